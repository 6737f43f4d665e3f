use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use diesel::{
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    attachments::{attachments_to_value, Attachment},
    auth::{authenticate_token, AuthenticatedUser},
    domain::{split_amount, ORDER_PAID, TASK_COMPLETED},
    error::{AppError, AppResult},
    hub::{WorkroomEvent, WorkroomHub},
    models::{Message, NewMessage, NewPaymentLog, PaymentLog, Task, Workroom},
    schema::{messages, payment_logs, payment_orders, tasks, workrooms},
    state::AppState,
    utils::time::to_iso,
};

use super::admin::{payment_log_to_response, PaymentLogResponse};
use super::tasks::{applicant_count, task_to_response, TaskResponse};
use super::users::{load_user_summaries, UserSummary};

pub const DEFAULT_MESSAGE_PAGE: i64 = 30;
pub const MAX_MESSAGE_PAGE: i64 = 100;
pub const MAX_MESSAGE_LEN: usize = 4000;
const MAX_NONCE_LEN: usize = 64;

#[derive(Serialize)]
pub struct WorkroomResponse {
    pub id: Uuid,
    pub task: TaskResponse,
    pub client: Option<UserSummary>,
    pub worker: Option<UserSummary>,
    pub role: String,
    pub client_finalised: bool,
    pub worker_finalised: bool,
    pub locked: bool,
    pub locked_at: Option<String>,
    pub payout: Option<PaymentLogResponse>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub seq: i64,
    pub workroom_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub attachments: Value,
    pub client_nonce: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageResponse>,
    pub next_before: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct MessageListQuery {
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub client_nonce: Option<String>,
}

#[derive(Serialize)]
pub struct FinaliseResponse {
    pub role: String,
    pub client_finalised: bool,
    pub worker_finalised: bool,
    pub locked: bool,
}

#[derive(Deserialize)]
pub struct PayoutRequest {
    pub upi_id: String,
}

#[derive(Deserialize)]
pub struct SocketQuery {
    pub token: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Party {
    Client,
    Worker,
}

impl Party {
    fn of(workroom: &Workroom, user_id: Uuid) -> Option<Self> {
        if workroom.client_id == user_id {
            Some(Party::Client)
        } else if workroom.worker_id == user_id {
            Some(Party::Worker)
        } else {
            None
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Party::Client => "client",
            Party::Worker => "worker",
        }
    }
}

pub async fn get_workroom(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workroom_id): Path<Uuid>,
) -> AppResult<Json<WorkroomResponse>> {
    let mut conn = state.db()?;
    let workroom: Workroom = workrooms::table.find(workroom_id).first(&mut conn)?;
    let role = match Party::of(&workroom, user.user_id) {
        Some(party) => party.as_str(),
        None if user.is_admin() => "admin",
        None => return Err(AppError::forbidden("not a member of this workroom")),
    };

    let task: Task = tasks::table.find(workroom.task_id).first(&mut conn)?;
    let count = applicant_count(&mut conn, task.id)?;
    let mut people = load_user_summaries(&mut conn, &[workroom.client_id, workroom.worker_id])?;
    let worker = take_summary(&mut people, workroom.worker_id);
    let client = take_summary(&mut people, workroom.client_id);
    let payout = payment_logs::table
        .filter(payment_logs::workroom_id.eq(workroom.id))
        .first::<PaymentLog>(&mut conn)
        .optional()?
        .map(payment_log_to_response);

    Ok(Json(WorkroomResponse {
        id: workroom.id,
        task: task_to_response(task, count),
        client,
        worker,
        role: role.to_string(),
        client_finalised: workroom.client_finalised,
        worker_finalised: workroom.worker_finalised,
        locked: workroom.is_locked(),
        locked_at: workroom.locked_at.map(to_iso),
        payout,
        created_at: to_iso(workroom.created_at),
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workroom_id): Path<Uuid>,
    Query(params): Query<MessageListQuery>,
) -> AppResult<Json<MessagePage>> {
    let mut conn = state.db()?;
    let workroom: Workroom = workrooms::table.find(workroom_id).first(&mut conn)?;
    if !workroom.is_participant(user.user_id) && !user.is_admin() {
        return Err(AppError::forbidden("not a member of this workroom"));
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_MESSAGE_PAGE)
        .clamp(1, MAX_MESSAGE_PAGE);

    let page = if let Some(after) = params.after {
        let rows: Vec<Message> = messages::table
            .filter(messages::workroom_id.eq(workroom_id))
            .filter(messages::seq.gt(after))
            .order(messages::seq.asc())
            .limit(limit)
            .load(&mut conn)?;
        MessagePage {
            messages: rows.into_iter().map(message_to_response).collect(),
            next_before: None,
        }
    } else {
        let mut query = messages::table
            .filter(messages::workroom_id.eq(workroom_id))
            .into_boxed();
        if let Some(before) = params.before {
            query = query.filter(messages::seq.lt(before));
        }
        let mut rows: Vec<Message> = query
            .order(messages::seq.desc())
            .limit(limit)
            .load(&mut conn)?;
        rows.reverse();
        let next_before = older_page_cursor(&rows, limit);
        MessagePage {
            messages: rows.into_iter().map(message_to_response).collect(),
            next_before,
        }
    };

    Ok(Json(page))
}

pub async fn post_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workroom_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let text = payload.text.trim().to_string();
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::bad_request(format!(
            "messages are limited to {MAX_MESSAGE_LEN} characters"
        )));
    }
    if text.is_empty() && payload.attachments.is_empty() {
        return Err(AppError::bad_request("message needs text or attachments"));
    }
    let nonce = payload
        .client_nonce
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned);
    if nonce.as_ref().is_some_and(|n| n.len() > MAX_NONCE_LEN) {
        return Err(AppError::bad_request("client_nonce is too long"));
    }
    let attachments = attachments_to_value(payload.attachments)?;

    let mut conn = state.db()?;
    let (message, created) = conn.transaction::<(Message, bool), AppError, _>(|conn| {
        let workroom = lock_workroom(conn, workroom_id)?;
        if !workroom.is_participant(user.user_id) {
            return Err(AppError::forbidden("not a member of this workroom"));
        }
        if workroom.is_locked() {
            return Err(AppError::conflict("workroom is locked"));
        }

        if let Some(nonce) = nonce.as_deref() {
            if let Some(existing) = find_by_nonce(conn, workroom_id, user.user_id, nonce)? {
                return Ok((existing, false));
            }
        }

        let new_message = NewMessage {
            id: Uuid::new_v4(),
            workroom_id,
            sender_id: user.user_id,
            text: text.clone(),
            attachments: attachments.clone(),
            client_nonce: nonce.clone(),
        };

        match diesel::insert_into(messages::table)
            .values(&new_message)
            .execute(conn)
        {
            Ok(_) => {}
            // The workroom row lock serialises senders, so this only fires on a
            // nonce race from outside the lock.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(AppError::conflict("duplicate message"));
            }
            Err(err) => return Err(AppError::from(err)),
        }

        Ok((messages::table.find(new_message.id).first(conn)?, true))
    })?;

    let response = message_to_response(message);
    if !created {
        debug!(message_id = %response.id, "duplicate message submission collapsed");
        return Ok((StatusCode::OK, Json(response)));
    }

    let delivered = state.hub.publish(
        workroom_id,
        WorkroomEvent::MessageCreated {
            message: serde_json::to_value(&response)?,
        },
    );
    debug!(%workroom_id, message_id = %response.id, delivered, "message stored");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn finalise(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workroom_id): Path<Uuid>,
) -> AppResult<Json<FinaliseResponse>> {
    let mut conn = state.db()?;
    let (party, workroom) = conn.transaction::<(Party, Workroom), AppError, _>(|conn| {
        let workroom = lock_workroom(conn, workroom_id)?;
        let party = Party::of(&workroom, user.user_id)
            .ok_or_else(|| AppError::forbidden("not a member of this workroom"))?;
        if workroom.is_locked() {
            return Ok((party, workroom));
        }

        let (client_finalised, worker_finalised) = match party {
            Party::Client => (true, workroom.worker_finalised),
            Party::Worker => (workroom.client_finalised, true),
        };
        let now = Utc::now().naive_utc();
        let locked_at = (client_finalised && worker_finalised).then_some(now);

        diesel::update(workrooms::table.find(workroom_id))
            .set((
                workrooms::client_finalised.eq(client_finalised),
                workrooms::worker_finalised.eq(worker_finalised),
                workrooms::locked_at.eq(locked_at),
            ))
            .execute(conn)?;

        if locked_at.is_some() {
            diesel::update(tasks::table.find(workroom.task_id))
                .set((
                    tasks::status.eq(TASK_COMPLETED),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        Ok((party, workrooms::table.find(workroom_id).first(conn)?))
    })?;

    let response = FinaliseResponse {
        role: party.as_str().to_string(),
        client_finalised: workroom.client_finalised,
        worker_finalised: workroom.worker_finalised,
        locked: workroom.is_locked(),
    };

    state.hub.publish(
        workroom_id,
        WorkroomEvent::Finalised {
            role: response.role.clone(),
            client_finalised: response.client_finalised,
            worker_finalised: response.worker_finalised,
            locked: response.locked,
        },
    );
    if response.locked {
        info!(%workroom_id, task_id = %workroom.task_id, "workroom locked, task completed");
    }

    Ok(Json(response))
}

pub async fn request_payout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workroom_id): Path<Uuid>,
    Json(payload): Json<PayoutRequest>,
) -> AppResult<(StatusCode, Json<PaymentLogResponse>)> {
    let upi_id = payload.upi_id.trim().to_string();
    if !is_valid_upi_id(&upi_id) {
        return Err(AppError::bad_request("upi_id must look like name@bank"));
    }
    let fee_bps = state.config.platform_fee_bps;

    let mut conn = state.db()?;
    let log = conn.transaction::<PaymentLog, AppError, _>(|conn| {
        let workroom = lock_workroom(conn, workroom_id)?;
        if workroom.worker_id != user.user_id {
            return Err(AppError::forbidden("only the freelancer can request payout"));
        }
        if !workroom.is_locked() {
            return Err(AppError::conflict(
                "both parties must finalise before requesting payout",
            ));
        }
        let existing: i64 = payment_logs::table
            .filter(payment_logs::workroom_id.eq(workroom_id))
            .count()
            .get_result(conn)?;
        if existing > 0 {
            return Err(AppError::conflict("payout already requested"));
        }

        // Gross is what the client was charged, not the current task price.
        let gross_amount: i64 = payment_orders::table
            .filter(payment_orders::task_id.eq(workroom.task_id))
            .filter(payment_orders::applicant_id.eq(workroom.worker_id))
            .filter(payment_orders::status.eq(ORDER_PAID))
            .select(payment_orders::amount)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::conflict("no paid order backs this workroom"))?;
        let task: Task = tasks::table.find(workroom.task_id).first(conn)?;
        let (fee, net_amount) = split_amount(gross_amount, fee_bps);
        let new_log = NewPaymentLog {
            id: Uuid::new_v4(),
            workroom_id,
            task_id: task.id,
            freelancer_id: user.user_id,
            upi_id: upi_id.clone(),
            gross_amount,
            fee,
            net_amount,
        };
        diesel::insert_into(payment_logs::table)
            .values(&new_log)
            .execute(conn)?;

        diesel::update(tasks::table.find(task.id))
            .set((
                tasks::payment_requested.eq(true),
                tasks::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        Ok(payment_logs::table.find(new_log.id).first(conn)?)
    })?;

    info!(
        %workroom_id,
        payment_log_id = %log.id,
        gross = log.gross_amount,
        net = log.net_amount,
        "payout requested"
    );
    Ok((StatusCode::CREATED, Json(payment_log_to_response(log))))
}

pub async fn workroom_socket(
    State(state): State<AppState>,
    Path(workroom_id): Path<Uuid>,
    Query(query): Query<SocketQuery>,
    ws: Option<WebSocketUpgrade>,
) -> AppResult<Response> {
    let user = authenticate_token(&state, &query.token)?;
    let mut conn = state.db()?;
    let workroom: Workroom = workrooms::table.find(workroom_id).first(&mut conn)?;
    drop(conn);
    if !workroom.is_participant(user.user_id) {
        return Err(AppError::forbidden("not a member of this workroom"));
    }
    let ws = ws.ok_or_else(|| AppError::bad_request("websocket upgrade required"))?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| run_socket(socket, hub, workroom_id, user.user_id)))
}

async fn run_socket(socket: WebSocket, hub: Arc<WorkroomHub>, workroom_id: Uuid, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = hub.subscribe(workroom_id);
    debug!(%workroom_id, %user_id, "workroom socket connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%workroom_id, %user_id, skipped, "workroom socket lagging; client should re-poll");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(events);
    hub.release(workroom_id);
    debug!(%workroom_id, %user_id, "workroom socket closed");
}

fn lock_workroom(conn: &mut PgConnection, workroom_id: Uuid) -> AppResult<Workroom> {
    Ok(workrooms::table.find(workroom_id).for_update().first(conn)?)
}

fn find_by_nonce(
    conn: &mut PgConnection,
    workroom_id: Uuid,
    sender_id: Uuid,
    nonce: &str,
) -> AppResult<Option<Message>> {
    Ok(messages::table
        .filter(messages::workroom_id.eq(workroom_id))
        .filter(messages::sender_id.eq(sender_id))
        .filter(messages::client_nonce.eq(nonce))
        .first(conn)
        .optional()?)
}

fn take_summary(people: &mut Vec<UserSummary>, id: Uuid) -> Option<UserSummary> {
    let index = people.iter().position(|person| person.id == id)?;
    Some(people.swap_remove(index))
}

/// Cursor for the next older page; `None` once the history is exhausted.
fn older_page_cursor(rows: &[Message], limit: i64) -> Option<i64> {
    if (rows.len() as i64) < limit {
        return None;
    }
    rows.first().map(|message| message.seq)
}

fn is_valid_upi_id(value: &str) -> bool {
    let Some((handle, provider)) = value.split_once('@') else {
        return false;
    };
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
    value.len() <= 100
        && handle.len() >= 2
        && provider.len() >= 2
        && handle.chars().all(allowed)
        && provider.chars().all(|c| c.is_ascii_alphanumeric())
}

pub(crate) fn message_to_response(message: Message) -> MessageResponse {
    MessageResponse {
        id: message.id,
        seq: message.seq,
        workroom_id: message.workroom_id,
        sender_id: message.sender_id,
        text: message.text,
        attachments: message.attachments,
        client_nonce: message.client_nonce,
        created_at: to_iso(message.created_at),
    }
}
