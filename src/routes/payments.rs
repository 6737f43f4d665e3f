use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::{pg::PgConnection, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::{ORDER_CREATED, ORDER_PAID, TASK_IN_PROGRESS, TASK_OPEN},
    error::{AppError, AppResult},
    models::{NewPaymentOrder, NewWorkroom, PaymentOrder, Task, Workroom},
    schema::{payment_orders, task_applicants, tasks, workrooms},
    state::AppState,
};

use super::tasks::lock_task;

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub task_id: Uuid,
    pub applicant_id: Uuid,
}

#[derive(Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Serialize)]
pub struct VerifyPaymentResponse {
    pub task_id: Uuid,
    pub selected_applicant: Uuid,
    pub workroom_id: Uuid,
    pub status: String,
}

/// Opens a gateway order for hiring `applicant_id` on the caller's task.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<CreateOrderResponse>)> {
    let task = {
        let mut conn = state.db()?;
        let task: Task = tasks::table.find(payload.task_id).first(&mut conn)?;
        if task.client_id != user.user_id {
            return Err(AppError::forbidden("only the task owner can hire"));
        }
        if task.status != TASK_OPEN || task.selected_applicant.is_some() {
            return Err(AppError::conflict("task already has a selected freelancer"));
        }
        let applied: i64 = task_applicants::table
            .filter(task_applicants::task_id.eq(task.id))
            .filter(task_applicants::user_id.eq(payload.applicant_id))
            .count()
            .get_result(&mut conn)?;
        if applied == 0 {
            return Err(AppError::bad_request("user has not applied to this task"));
        }
        task
    };

    let currency = state.config.payment_currency.clone();
    let receipt = format!("task-{}", task.id.simple());
    let order = state
        .payments
        .create_order(task.price, &currency, &receipt)
        .await?;

    let mut conn = state.db()?;
    let new_order = NewPaymentOrder {
        id: Uuid::new_v4(),
        task_id: task.id,
        client_id: user.user_id,
        applicant_id: payload.applicant_id,
        gateway_order_id: order.id.clone(),
        amount: order.amount,
        currency: order.currency.clone(),
        status: ORDER_CREATED.to_string(),
    };
    diesel::insert_into(payment_orders::table)
        .values(&new_order)
        .execute(&mut conn)?;

    info!(
        task_id = %task.id,
        applicant_id = %payload.applicant_id,
        gateway_order_id = %order.id,
        amount = order.amount,
        "escrow order created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            key_id: state.payments.key_id().to_string(),
        }),
    ))
}

/// Confirms a checkout callback and hires the applicant the order was opened for.
/// Replays for an already paid order return the existing workroom.
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<Json<VerifyPaymentResponse>> {
    if !state
        .payments
        .verify_payment(&payload.order_id, &payload.payment_id, &payload.signature)
    {
        warn!(gateway_order_id = %payload.order_id, "payment signature mismatch");
        return Err(AppError::bad_request("payment signature is invalid"));
    }

    let mut conn = state.db()?;
    let response = conn.transaction::<VerifyPaymentResponse, AppError, _>(|conn| {
        let order: PaymentOrder = payment_orders::table
            .filter(payment_orders::gateway_order_id.eq(&payload.order_id))
            .for_update()
            .first(conn)?;
        if order.client_id != user.user_id {
            return Err(AppError::forbidden("order belongs to another user"));
        }

        let task = lock_task(conn, order.task_id)?;

        if order.status == ORDER_PAID {
            return existing_selection(conn, &task, &order);
        }

        if task.selected_applicant.is_some() || task.status != TASK_OPEN {
            return Err(AppError::conflict("task already has a selected freelancer"));
        }

        let still_applied: i64 = task_applicants::table
            .filter(task_applicants::task_id.eq(task.id))
            .filter(task_applicants::user_id.eq(order.applicant_id))
            .count()
            .get_result(conn)?;
        if still_applied == 0 {
            warn!(
                gateway_order_id = %order.gateway_order_id,
                applicant_id = %order.applicant_id,
                "paid order names an applicant who withdrew"
            );
            return Err(AppError::conflict("applicant has withdrawn from this task"));
        }

        let now = Utc::now().naive_utc();
        diesel::update(payment_orders::table.find(order.id))
            .set((
                payment_orders::status.eq(ORDER_PAID),
                payment_orders::gateway_payment_id.eq(Some(payload.payment_id.as_str())),
                payment_orders::updated_at.eq(now),
            ))
            .execute(conn)?;

        let workroom = NewWorkroom {
            id: Uuid::new_v4(),
            task_id: task.id,
            client_id: task.client_id,
            worker_id: order.applicant_id,
        };
        diesel::insert_into(workrooms::table)
            .values(&workroom)
            .execute(conn)?;

        diesel::update(tasks::table.find(task.id))
            .set((
                tasks::selected_applicant.eq(Some(order.applicant_id)),
                tasks::status.eq(TASK_IN_PROGRESS),
                tasks::workroom_id.eq(Some(workroom.id)),
                tasks::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(VerifyPaymentResponse {
            task_id: task.id,
            selected_applicant: order.applicant_id,
            workroom_id: workroom.id,
            status: TASK_IN_PROGRESS.to_string(),
        })
    })?;

    info!(
        task_id = %response.task_id,
        selected_applicant = %response.selected_applicant,
        workroom_id = %response.workroom_id,
        "escrow funded, freelancer selected"
    );
    Ok(Json(response))
}

fn existing_selection(
    conn: &mut PgConnection,
    task: &Task,
    order: &PaymentOrder,
) -> AppResult<VerifyPaymentResponse> {
    let workroom: Workroom = workrooms::table
        .filter(workrooms::task_id.eq(task.id))
        .first(conn)?;
    if workroom.worker_id != order.applicant_id {
        return Err(AppError::conflict("order was superseded by another selection"));
    }
    Ok(VerifyPaymentResponse {
        task_id: task.id,
        selected_applicant: workroom.worker_id,
        workroom_id: workroom.id,
        status: task.status.clone(),
    })
}
