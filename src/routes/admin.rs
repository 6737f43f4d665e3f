use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{
    dsl::{count_star, sql},
    prelude::*,
    sql_types::BigInt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    domain::{is_role, is_task_status, Plan, TICKET_OPEN},
    error::{AppError, AppResult},
    models::{PaymentLog, Task, User},
    schema::{payment_logs, tasks, tickets, users},
    state::AppState,
    utils::time::to_iso,
};

use super::tasks::{escape_like, page_bounds, tasks_with_counts, TaskResponse};
use super::users::{user_to_profile, UserProfile};

#[derive(Deserialize, Default)]
pub struct AdminUserQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub plan: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct AdminTaskQuery {
    pub status: Option<String>,
    pub flagged: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct ModerateTaskRequest {
    pub flagged: Option<bool>,
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct PaymentLogQuery {
    pub paid: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdatePaymentRequest {
    pub paid: bool,
}

#[derive(Serialize)]
pub struct PaymentLogResponse {
    pub id: Uuid,
    pub workroom_id: Uuid,
    pub task_id: Uuid,
    pub freelancer_id: Uuid,
    pub upi_id: String,
    pub gross_amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    pub paid: bool,
    pub paid_at: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub users: i64,
    pub tasks_by_status: BTreeMap<String, i64>,
    pub flagged_tasks: i64,
    pub open_tickets: i64,
    pub unpaid_payouts: i64,
    pub unpaid_payout_total: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct AdminUserChangeset {
    plan: Option<String>,
    role: Option<String>,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = tasks)]
struct ModerateTaskChangeset {
    flagged: Option<bool>,
    status: Option<String>,
    updated_at: NaiveDateTime,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<AdminUserQuery>,
) -> AppResult<Json<Vec<UserProfile>>> {
    let mut conn = state.db()?;
    let (limit, offset) = page_bounds(params.limit, params.offset);
    let mut query = users::table.into_boxed();
    if let Some(text) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", escape_like(text));
        query = query.filter(
            users::name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern)),
        );
    }
    let rows: Vec<User> = query
        .order(users::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(user_to_profile).collect()))
}

pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserProfile>> {
    let plan = payload
        .plan
        .as_deref()
        .map(|value| value.parse::<Plan>().map_err(AppError::bad_request))
        .transpose()?
        .map(|plan| plan.as_str().to_string());
    let role = match payload.role.as_deref().map(str::trim) {
        None => None,
        Some(role) if is_role(role) => Some(role.to_string()),
        Some(other) => return Err(AppError::bad_request(format!("unknown role '{other}'"))),
    };
    if role.is_some() && user_id == admin.user_id {
        return Err(AppError::bad_request("admins cannot change their own role"));
    }

    let mut conn = state.db()?;
    let updated = diesel::update(users::table.find(user_id))
        .set(&AdminUserChangeset {
            plan,
            role,
            updated_at: Utc::now().naive_utc(),
        })
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let user: User = users::table.find(user_id).first(&mut conn)?;
    info!(admin_id = %admin.user_id, %user_id, plan = %user.plan, role = %user.role, "user updated by admin");
    Ok(Json(user_to_profile(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if user_id == admin.user_id {
        return Err(AppError::bad_request("admins cannot delete themselves"));
    }
    let mut conn = state.db()?;
    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(admin_id = %admin.user_id, %user_id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<AdminTaskQuery>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let (limit, offset) = page_bounds(params.limit, params.offset);
    let mut query = tasks::table.into_boxed();
    if let Some(status) = params.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if !is_task_status(status) {
            return Err(AppError::bad_request(format!("unknown status '{status}'")));
        }
        query = query.filter(tasks::status.eq(status.to_string()));
    }
    if let Some(flagged) = params.flagged {
        query = query.filter(tasks::flagged.eq(flagged));
    }
    let rows: Vec<Task> = query
        .order(tasks::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;
    Ok(Json(tasks_with_counts(&mut conn, rows)?))
}

pub async fn moderate_task(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<ModerateTaskRequest>,
) -> AppResult<Json<TaskResponse>> {
    let status = match payload.status.as_deref().map(str::trim) {
        None => None,
        Some(status) if is_task_status(status) => Some(status.to_string()),
        Some(other) => return Err(AppError::bad_request(format!("unknown status '{other}'"))),
    };

    let mut conn = state.db()?;
    let updated = diesel::update(tasks::table.find(task_id))
        .set(&ModerateTaskChangeset {
            flagged: payload.flagged,
            status,
            updated_at: Utc::now().naive_utc(),
        })
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    info!(admin_id = %admin.user_id, %task_id, flagged = task.flagged, status = %task.status, "task moderated");
    let mut response = tasks_with_counts(&mut conn, vec![task])?;
    response.pop().map(Json).ok_or_else(AppError::not_found)
}

pub async fn delete_task(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(tasks::table.find(task_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(admin_id = %admin.user_id, %task_id, "task deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_payment_logs(
    State(state): State<AppState>,
    Query(params): Query<PaymentLogQuery>,
) -> AppResult<Json<Vec<PaymentLogResponse>>> {
    let mut conn = state.db()?;
    let mut query = payment_logs::table.into_boxed();
    if let Some(paid) = params.paid {
        query = query.filter(payment_logs::paid.eq(paid));
    }
    let rows: Vec<PaymentLog> = query
        .order(payment_logs::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(payment_log_to_response).collect()))
}

pub async fn update_payment_log(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(log_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentRequest>,
) -> AppResult<Json<PaymentLogResponse>> {
    let mut conn = state.db()?;
    let log = conn.transaction::<PaymentLog, AppError, _>(|conn| {
        let log: PaymentLog = payment_logs::table.find(log_id).for_update().first(conn)?;
        if log.paid == payload.paid {
            return Ok(log);
        }
        let now = Utc::now().naive_utc();
        diesel::update(payment_logs::table.find(log_id))
            .set((
                payment_logs::paid.eq(payload.paid),
                payment_logs::paid_at.eq(payload.paid.then_some(now)),
                payment_logs::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(payment_logs::table.find(log_id).first(conn)?)
    })?;

    info!(admin_id = %admin.user_id, payment_log_id = %log.id, paid = log.paid, "payout status changed");
    Ok(Json(payment_log_to_response(log)))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let mut conn = state.db()?;
    let user_count: i64 = users::table.select(count_star()).first(&mut conn)?;
    let tasks_by_status: BTreeMap<String, i64> = tasks::table
        .group_by(tasks::status)
        .select((tasks::status, count_star()))
        .load::<(String, i64)>(&mut conn)?
        .into_iter()
        .collect();
    let flagged_tasks: i64 = tasks::table
        .filter(tasks::flagged.eq(true))
        .select(count_star())
        .first(&mut conn)?;
    let open_tickets: i64 = tickets::table
        .filter(tickets::status.eq(TICKET_OPEN))
        .select(count_star())
        .first(&mut conn)?;
    // SUM(bigint) is numeric in Postgres; cast back so it loads as i64.
    let (unpaid_payouts, unpaid_payout_total): (i64, i64) = payment_logs::table
        .filter(payment_logs::paid.eq(false))
        .select((
            count_star(),
            sql::<BigInt>("COALESCE(SUM(payment_logs.net_amount), 0)::BIGINT"),
        ))
        .first(&mut conn)?;

    Ok(Json(StatsResponse {
        users: user_count,
        tasks_by_status,
        flagged_tasks,
        open_tickets,
        unpaid_payouts,
        unpaid_payout_total,
    }))
}

pub(crate) fn payment_log_to_response(log: PaymentLog) -> PaymentLogResponse {
    PaymentLogResponse {
        id: log.id,
        workroom_id: log.workroom_id,
        task_id: log.task_id,
        freelancer_id: log.freelancer_id,
        upi_id: log.upi_id,
        gross_amount: log.gross_amount,
        fee: log.fee,
        net_amount: log.net_amount,
        paid: log.paid,
        paid_at: log.paid_at.map(to_iso),
        created_at: to_iso(log.created_at),
    }
}
