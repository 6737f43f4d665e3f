use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub oauth_provider: Option<String>,
    pub oauth_subject: Option<String>,
    pub avatar_url: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub plan: String,
    pub role: String,
    pub slug: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub skills: Vec<String>,
    pub plan: String,
    pub role: String,
    pub slug: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = user_projects)]
#[diesel(belongs_to(User))]
pub struct UserProject {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub media: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_projects)]
pub struct NewUserProject {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub media: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub category: Vec<String>,
    pub deadline: Option<NaiveDateTime>,
    pub status: String,
    pub flagged: bool,
    pub payment_requested: bool,
    pub selected_applicant: Option<Uuid>,
    pub workroom_id: Option<Uuid>,
    pub attachments: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub category: Vec<String>,
    pub deadline: Option<NaiveDateTime>,
    pub status: String,
    pub attachments: serde_json::Value,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = task_applicants)]
#[diesel(belongs_to(Task))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(task_id, user_id))]
pub struct TaskApplicant {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub cover_letter: Option<String>,
    pub applied_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_applicants)]
pub struct NewTaskApplicant {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub cover_letter: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = payment_orders)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub client_id: Uuid,
    pub applicant_id: Uuid,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub gateway_payment_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = payment_orders)]
pub struct NewPaymentOrder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub client_id: Uuid,
    pub applicant_id: Uuid,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = workrooms)]
pub struct Workroom {
    pub id: Uuid,
    pub task_id: Uuid,
    pub client_id: Uuid,
    pub worker_id: Uuid,
    pub client_finalised: bool,
    pub worker_finalised: bool,
    pub locked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Workroom {
    pub fn is_locked(&self) -> bool {
        self.client_finalised && self.worker_finalised
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.worker_id == user_id
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workrooms)]
pub struct NewWorkroom {
    pub id: Uuid,
    pub task_id: Uuid,
    pub client_id: Uuid,
    pub worker_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(Workroom))]
pub struct Message {
    pub id: Uuid,
    pub seq: i64,
    pub workroom_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub attachments: serde_json::Value,
    pub client_nonce: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub workroom_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub attachments: serde_json::Value,
    pub client_nonce: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = payment_logs)]
pub struct PaymentLog {
    pub id: Uuid,
    pub workroom_id: Uuid,
    pub task_id: Uuid,
    pub freelancer_id: Uuid,
    pub upi_id: String,
    pub gross_amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    pub paid: bool,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = payment_logs)]
pub struct NewPaymentLog {
    pub id: Uuid,
    pub workroom_id: Uuid,
    pub task_id: Uuid,
    pub freelancer_id: Uuid,
    pub upi_id: String,
    pub gross_amount: i64,
    pub fee: i64,
    pub net_amount: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question: String,
    pub answer: Option<String>,
    pub status: String,
    pub published: bool,
    pub files: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question: String,
    pub status: String,
    pub files: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_comments)]
#[diesel(belongs_to(Ticket))]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct NewTicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
