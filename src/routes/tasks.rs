use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{
    dsl::count_star,
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    attachments::{attachments_to_value, Attachment},
    auth::AuthenticatedUser,
    domain::{is_task_status, ORDER_CREATED, TASK_OPEN},
    error::{AppError, AppResult},
    models::{NewTask, NewTaskApplicant, Task, TaskApplicant, User},
    schema::{payment_orders, task_applicants, tasks, users},
    state::AppState,
    utils::{
        json::{classify_nullable, NullableValue},
        time::{parse_iso, to_iso},
    },
};

use super::users::{load_user_summaries, user_to_summary, UserSummary};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
const MAX_CATEGORIES: usize = 8;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub price: i64,
    #[serde(default)]
    pub category: Vec<String>,
    pub deadline: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize, Default)]
pub struct TaskListQuery {
    pub category: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub cover_letter: Option<String>,
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub category: Vec<String>,
    pub deadline: Option<String>,
    pub status: String,
    pub flagged: bool,
    pub payment_requested: bool,
    pub selected_applicant: Option<Uuid>,
    pub workroom_id: Option<Uuid>,
    pub attachments: Value,
    pub metadata: Value,
    pub number_of_applicants: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct TaskDetailResponse {
    pub task: TaskResponse,
    pub client: Option<UserSummary>,
}

#[derive(Serialize)]
pub struct ApplicantResponse {
    pub user: UserSummary,
    pub cover_letter: Option<String>,
    pub applied_at: String,
    pub selected: bool,
}

#[derive(AsChangeset)]
#[diesel(table_name = tasks)]
struct UpdateTaskChangeset {
    title: Option<String>,
    description: Option<String>,
    price: Option<i64>,
    category: Option<Vec<String>>,
    deadline: Option<Option<NaiveDateTime>>,
    attachments: Option<Value>,
    metadata: Option<Value>,
    updated_at: NaiveDateTime,
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let title = payload.title.trim();
    let description = payload.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(AppError::bad_request("title and description are required"));
    }
    validate_price(payload.price)?;
    let deadline = payload
        .deadline
        .as_deref()
        .map(parse_deadline)
        .transpose()?;

    let new_task = NewTask {
        id: Uuid::new_v4(),
        client_id: user.user_id,
        title: title.to_string(),
        description: description.to_string(),
        price: payload.price,
        category: normalize_categories(&payload.category)?,
        deadline,
        status: TASK_OPEN.to_string(),
        attachments: attachments_to_value(payload.attachments)?,
        metadata: validate_metadata(payload.metadata)?,
    };

    let mut conn = state.db()?;
    diesel::insert_into(tasks::table)
        .values(&new_task)
        .execute(&mut conn)?;

    let task: Task = tasks::table.find(new_task.id).first(&mut conn)?;
    info!(task_id = %task.id, client_id = %user.user_id, price = task.price, "task posted");
    Ok((StatusCode::CREATED, Json(task_to_response(task, 0))))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let (limit, offset) = page_bounds(params.limit, params.offset);

    let mut query = tasks::table
        .filter(tasks::flagged.eq(false))
        .into_boxed();

    match params.status.as_deref().map(str::trim) {
        None | Some("") => query = query.filter(tasks::status.eq(TASK_OPEN)),
        Some("all") => {}
        Some(status) if is_task_status(status) => {
            query = query.filter(tasks::status.eq(status.to_string()))
        }
        Some(other) => {
            return Err(AppError::bad_request(format!("unknown status '{other}'")));
        }
    }

    if let Some(category) = params
        .category
        .as_deref()
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
    {
        query = query.filter(tasks::category.contains(vec![category]));
    }

    if let Some(text) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        query = query.filter(tasks::title.ilike(format!("%{}%", escape_like(text))));
    }

    let rows: Vec<Task> = query
        .order(tasks::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(tasks_with_counts(&mut conn, rows)?))
}

/// Flagged tasks are only visible to their owner and to admins.
pub async fn get_task(
    State(state): State<AppState>,
    viewer: Option<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<TaskDetailResponse>> {
    let mut conn = state.db()?;
    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    let privileged = viewer
        .as_ref()
        .is_some_and(|viewer| viewer.is_admin() || viewer.user_id == task.client_id);
    if task.flagged && !privileged {
        return Err(AppError::not_found());
    }
    let client = users::table
        .find(task.client_id)
        .first::<User>(&mut conn)
        .optional()?
        .map(user_to_summary);
    let count = applicant_count(&mut conn, task.id)?;

    Ok(Json(TaskDetailResponse {
        task: task_to_response(task, count),
        client,
    }))
}

pub async fn update_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<TaskResponse>> {
    let title = optional_text(&body, "title")?;
    let description = optional_text(&body, "description")?;
    let price = match body.get("price") {
        None => None,
        Some(value) => {
            let price = value
                .as_i64()
                .ok_or_else(|| AppError::bad_request("price must be an integer"))?;
            validate_price(price)?;
            Some(price)
        }
    };
    let category = match body.get("category") {
        None => None,
        Some(value) => {
            let list: Vec<String> = serde_json::from_value(value.clone())
                .map_err(|_| AppError::bad_request("category must be a list of strings"))?;
            Some(normalize_categories(&list)?)
        }
    };
    let deadline = match classify_nullable(body.get("deadline")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::String(value) => Some(Some(parse_deadline(&value)?)),
    };
    let attachments = match body.get("attachments") {
        None => None,
        Some(value) => {
            let list: Vec<Attachment> = serde_json::from_value(value.clone())
                .map_err(|_| AppError::bad_request("attachments are malformed"))?;
            Some(attachments_to_value(list)?)
        }
    };
    let metadata = match body.get("metadata") {
        None => None,
        Some(value) => Some(validate_metadata(Some(value.clone()))?),
    };

    let changeset = UpdateTaskChangeset {
        title,
        description,
        price,
        category,
        deadline,
        attachments,
        metadata,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let task = conn.transaction::<Task, AppError, _>(|conn| {
        let task = lock_task(conn, task_id)?;
        ensure_owner(&task, &user)?;
        if task.status != TASK_OPEN || task.selected_applicant.is_some() {
            return Err(AppError::conflict(
                "task can only be edited while it is open",
            ));
        }
        if changeset.price.is_some_and(|price| price != task.price)
            && has_pending_order(conn, task_id)?
        {
            return Err(AppError::conflict(
                "price cannot change while a payment order is pending",
            ));
        }
        diesel::update(tasks::table.find(task_id))
            .set(&changeset)
            .execute(conn)?;
        Ok(tasks::table.find(task_id).first(conn)?)
    })?;

    let count = applicant_count(&mut conn, task.id)?;
    Ok(Json(task_to_response(task, count)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let task = lock_task(conn, task_id)?;
        ensure_owner(&task, &user)?;
        if task.selected_applicant.is_some() {
            return Err(AppError::conflict(
                "task with a selected freelancer cannot be deleted",
            ));
        }
        diesel::delete(tasks::table.find(task_id)).execute(conn)?;
        Ok(())
    })?;

    info!(task_id = %task_id, "task deleted by owner");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn apply_to_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<ApplyRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let task = lock_task(conn, task_id)?;
        if task.client_id == user.user_id {
            return Err(AppError::forbidden("cannot apply to your own task"));
        }
        if task.status != TASK_OPEN || task.flagged {
            return Err(AppError::conflict("task is not accepting applications"));
        }

        let application = NewTaskApplicant {
            task_id,
            user_id: user.user_id,
            cover_letter: payload
                .cover_letter
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        };

        match diesel::insert_into(task_applicants::table)
            .values(&application)
            .execute(conn)
        {
            Ok(_) => Ok(()),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(AppError::conflict("already applied to this task"))
            }
            Err(err) => Err(AppError::from(err)),
        }
    })?;

    info!(task_id = %task_id, applicant_id = %user.user_id, "application submitted");
    Ok(StatusCode::CREATED)
}

pub async fn withdraw_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let task = lock_task(conn, task_id)?;
        if task.selected_applicant.is_some() {
            return Err(AppError::conflict(
                "applications are final once a freelancer is selected",
            ));
        }
        let deleted = diesel::delete(
            task_applicants::table
                .filter(task_applicants::task_id.eq(task_id))
                .filter(task_applicants::user_id.eq(user.user_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_applicants(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<Vec<ApplicantResponse>>> {
    let mut conn = state.db()?;
    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    if task.client_id != user.user_id && !user.is_admin() {
        return Err(AppError::forbidden("only the task owner can view applicants"));
    }

    let applications: Vec<TaskApplicant> = task_applicants::table
        .filter(task_applicants::task_id.eq(task_id))
        .order(task_applicants::applied_at.asc())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = applications.iter().map(|a| a.user_id).collect();
    let mut summaries: HashMap<Uuid, UserSummary> = load_user_summaries(&mut conn, &ids)?
        .into_iter()
        .map(|summary| (summary.id, summary))
        .collect();

    let response = applications
        .into_iter()
        .filter_map(|application| {
            summaries
                .remove(&application.user_id)
                .map(|summary| ApplicantResponse {
                    selected: task.selected_applicant == Some(application.user_id),
                    user: summary,
                    cover_letter: application.cover_letter,
                    applied_at: to_iso(application.applied_at),
                })
        })
        .collect();

    Ok(Json(response))
}

pub async fn list_my_posted(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Task> = tasks::table
        .filter(tasks::client_id.eq(user.user_id))
        .order(tasks::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(tasks_with_counts(&mut conn, rows)?))
}

pub async fn list_my_applied(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Task> = tasks::table
        .inner_join(task_applicants::table)
        .filter(task_applicants::user_id.eq(user.user_id))
        .order(task_applicants::applied_at.desc())
        .select(tasks::all_columns)
        .load(&mut conn)?;
    Ok(Json(tasks_with_counts(&mut conn, rows)?))
}

pub(crate) fn lock_task(conn: &mut PgConnection, task_id: Uuid) -> AppResult<Task> {
    Ok(tasks::table.find(task_id).for_update().first(conn)?)
}

fn has_pending_order(conn: &mut PgConnection, task_id: Uuid) -> AppResult<bool> {
    let pending: i64 = payment_orders::table
        .filter(payment_orders::task_id.eq(task_id))
        .filter(payment_orders::status.eq(ORDER_CREATED))
        .select(count_star())
        .first(conn)?;
    Ok(pending > 0)
}

pub(crate) fn applicant_count(conn: &mut PgConnection, task_id: Uuid) -> AppResult<i64> {
    Ok(task_applicants::table
        .filter(task_applicants::task_id.eq(task_id))
        .select(count_star())
        .first(conn)?)
}

pub(crate) fn tasks_with_counts(
    conn: &mut PgConnection,
    rows: Vec<Task>,
) -> AppResult<Vec<TaskResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|task| task.id).collect();
    let counts: HashMap<Uuid, i64> = task_applicants::table
        .filter(task_applicants::task_id.eq_any(&ids))
        .group_by(task_applicants::task_id)
        .select((task_applicants::task_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(|task| {
            let count = counts.get(&task.id).copied().unwrap_or(0);
            task_to_response(task, count)
        })
        .collect())
}

pub(crate) fn task_to_response(task: Task, number_of_applicants: i64) -> TaskResponse {
    TaskResponse {
        id: task.id,
        client_id: task.client_id,
        title: task.title,
        description: task.description,
        price: task.price,
        category: task.category,
        deadline: task.deadline.map(to_iso),
        status: task.status,
        flagged: task.flagged,
        payment_requested: task.payment_requested,
        selected_applicant: task.selected_applicant,
        workroom_id: task.workroom_id,
        attachments: task.attachments,
        metadata: task.metadata,
        number_of_applicants,
        created_at: to_iso(task.created_at),
        updated_at: to_iso(task.updated_at),
    }
}

pub(crate) fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub(crate) fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn ensure_owner(task: &Task, user: &AuthenticatedUser) -> AppResult<()> {
    if task.client_id != user.user_id {
        return Err(AppError::forbidden("only the task owner can do that"));
    }
    Ok(())
}

fn validate_price(price: i64) -> AppResult<()> {
    if price <= 0 {
        return Err(AppError::bad_request("price must be greater than zero"));
    }
    Ok(())
}

fn parse_deadline(value: &str) -> AppResult<NaiveDateTime> {
    let deadline = parse_iso(value).map_err(AppError::bad_request)?;
    if deadline <= Utc::now().naive_utc() {
        return Err(AppError::bad_request("deadline must be in the future"));
    }
    Ok(deadline)
}

fn validate_metadata(metadata: Option<Value>) -> AppResult<Value> {
    match metadata {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(value @ Value::Object(_)) => Ok(value),
        Some(_) => Err(AppError::bad_request("metadata must be an object")),
    }
}

fn optional_text(body: &Value, field: &str) -> AppResult<Option<String>> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::String(value)) if !value.trim().is_empty() => {
            Ok(Some(value.trim().to_string()))
        }
        Some(_) => Err(AppError::bad_request(format!(
            "{field} must be a non-empty string"
        ))),
    }
}

fn normalize_categories(raw: &[String]) -> AppResult<Vec<String>> {
    let mut categories: Vec<String> = Vec::new();
    for entry in raw {
        let category = entry.trim().to_ascii_lowercase();
        if !category.is_empty() && !categories.contains(&category) {
            categories.push(category);
        }
    }
    if categories.len() > MAX_CATEGORIES {
        return Err(AppError::bad_request(format!(
            "at most {MAX_CATEGORIES} categories are allowed"
        )));
    }
    Ok(categories)
}
