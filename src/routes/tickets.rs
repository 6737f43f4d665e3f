use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    attachments::{attachments_to_value, Attachment},
    auth::{AdminUser, AuthenticatedUser},
    domain::{is_ticket_status, TICKET_ANSWERED, TICKET_CLOSED, TICKET_OPEN},
    error::{AppError, AppResult},
    models::{NewTicket, NewTicketComment, Ticket, TicketComment},
    schema::{ticket_comments, tickets},
    state::AppState,
    utils::{json::nullable_field, time::to_iso},
};

const MAX_QUESTION_LEN: usize = 2000;

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub question: String,
    #[serde(default)]
    pub files: Vec<Attachment>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

#[derive(Deserialize, Default)]
pub struct TicketListQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question: String,
    pub answer: Option<String>,
    pub status: String,
    pub published: bool,
    pub files: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct TicketDetailResponse {
    pub ticket: TicketResponse,
    pub comments: Vec<CommentResponse>,
}

#[derive(Serialize)]
pub struct FaqEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = tickets)]
struct TicketChangeset {
    answer: Option<Option<String>>,
    status: Option<String>,
    published: Option<bool>,
    updated_at: NaiveDateTime,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<TicketResponse>)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }
    if question.chars().count() > MAX_QUESTION_LEN {
        return Err(AppError::bad_request(format!(
            "question is limited to {MAX_QUESTION_LEN} characters"
        )));
    }

    let new_ticket = NewTicket {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        question: question.to_string(),
        status: TICKET_OPEN.to_string(),
        files: attachments_to_value(payload.files)?,
    };

    let mut conn = state.db()?;
    diesel::insert_into(tickets::table)
        .values(&new_ticket)
        .execute(&mut conn)?;
    let ticket: Ticket = tickets::table.find(new_ticket.id).first(&mut conn)?;

    info!(ticket_id = %ticket.id, user_id = %user.user_id, "support ticket opened");
    Ok((StatusCode::CREATED, Json(ticket_to_response(ticket))))
}

pub async fn list_my_tickets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TicketResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::user_id.eq(user.user_id))
        .order(tickets::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(ticket_to_response).collect()))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<TicketDetailResponse>> {
    let mut conn = state.db()?;
    let ticket: Ticket = tickets::table.find(ticket_id).first(&mut conn)?;
    if ticket.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::not_found());
    }

    let comments: Vec<TicketComment> = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket_id))
        .order(ticket_comments::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(TicketDetailResponse {
        ticket: ticket_to_response(ticket),
        comments: comments.into_iter().map(comment_to_response).collect(),
    }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(AppError::bad_request("comment must not be empty"));
    }

    let mut conn = state.db()?;
    let ticket: Ticket = tickets::table.find(ticket_id).first(&mut conn)?;
    if ticket.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::not_found());
    }
    if ticket.status == TICKET_CLOSED {
        return Err(AppError::conflict("ticket is closed"));
    }

    let new_comment = NewTicketComment {
        id: Uuid::new_v4(),
        ticket_id,
        author_id: user.user_id,
        body: body.to_string(),
    };
    diesel::insert_into(ticket_comments::table)
        .values(&new_comment)
        .execute(&mut conn)?;
    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::updated_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    let comment: TicketComment = ticket_comments::table
        .find(new_comment.id)
        .first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(comment_to_response(comment))))
}

pub async fn list_faq(State(state): State<AppState>) -> AppResult<Json<Vec<FaqEntry>>> {
    let mut conn = state.db()?;
    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::published.eq(true))
        .filter(tickets::answer.is_not_null())
        .order(tickets::updated_at.desc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .filter_map(|ticket| {
                ticket.answer.map(|answer| FaqEntry {
                    id: ticket.id,
                    question: ticket.question,
                    answer,
                })
            })
            .collect(),
    ))
}

pub async fn admin_list_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketListQuery>,
) -> AppResult<Json<Vec<TicketResponse>>> {
    let mut conn = state.db()?;
    let mut query = tickets::table.into_boxed();
    if let Some(status) = params.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if !is_ticket_status(status) {
            return Err(AppError::bad_request(format!("unknown status '{status}'")));
        }
        query = query.filter(tickets::status.eq(status.to_string()));
    }
    let rows: Vec<Ticket> = query.order(tickets::created_at.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(ticket_to_response).collect()))
}

pub async fn admin_update_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<TicketResponse>> {
    let answer = nullable_field(&body, "answer").map_err(AppError::bad_request)?;
    let mut status = match body.get("status") {
        None => None,
        Some(Value::String(value)) if is_ticket_status(value.trim()) => {
            Some(value.trim().to_string())
        }
        Some(other) => return Err(AppError::bad_request(format!("invalid status {other}"))),
    };
    let published = match body.get("published") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err(AppError::bad_request("published must be a boolean")),
    };
    if status.is_none() && matches!(answer, Some(Some(_))) {
        status = Some(TICKET_ANSWERED.to_string());
    }

    let mut conn = state.db()?;
    let ticket = conn.transaction::<Ticket, AppError, _>(|conn| {
        let existing: Ticket = tickets::table.find(ticket_id).for_update().first(conn)?;
        let will_have_answer = match &answer {
            Some(value) => value.is_some(),
            None => existing.answer.is_some(),
        };
        if published == Some(true) && !will_have_answer {
            return Err(AppError::bad_request("only answered tickets can be published"));
        }
        // Clearing the answer also withdraws it from the FAQ.
        let published = if will_have_answer { published } else { Some(false) };

        diesel::update(tickets::table.find(ticket_id))
            .set(&TicketChangeset {
                answer: answer.clone(),
                status: status.clone(),
                published,
                updated_at: Utc::now().naive_utc(),
            })
            .execute(conn)?;
        Ok(tickets::table.find(ticket_id).first(conn)?)
    })?;

    info!(admin_id = %admin.user_id, %ticket_id, status = %ticket.status, "ticket updated");
    Ok(Json(ticket_to_response(ticket)))
}

pub async fn admin_delete_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(tickets::table.find(ticket_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

fn ticket_to_response(ticket: Ticket) -> TicketResponse {
    TicketResponse {
        id: ticket.id,
        user_id: ticket.user_id,
        question: ticket.question,
        answer: ticket.answer,
        status: ticket.status,
        published: ticket.published,
        files: ticket.files,
        created_at: to_iso(ticket.created_at),
        updated_at: to_iso(ticket.updated_at),
    }
}

fn comment_to_response(comment: TicketComment) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        author_id: comment.author_id,
        body: comment.body,
        created_at: to_iso(comment.created_at),
    }
}
