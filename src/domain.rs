use std::fmt;
use std::str::FromStr;

use rand::{rngs::OsRng, RngCore};

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

pub const TASK_OPEN: &str = "open";
pub const TASK_IN_PROGRESS: &str = "in_progress";
pub const TASK_COMPLETED: &str = "completed";
pub const TASK_CANCELLED: &str = "cancelled";
pub const TASK_STATUSES: &[&str] = &[TASK_OPEN, TASK_IN_PROGRESS, TASK_COMPLETED, TASK_CANCELLED];

pub const ORDER_CREATED: &str = "created";
pub const ORDER_PAID: &str = "paid";

pub const TICKET_OPEN: &str = "open";
pub const TICKET_ANSWERED: &str = "answered";
pub const TICKET_CLOSED: &str = "closed";
pub const TICKET_STATUSES: &[&str] = &[TICKET_OPEN, TICKET_ANSWERED, TICKET_CLOSED];

pub fn is_task_status(value: &str) -> bool {
    TASK_STATUSES.contains(&value)
}

pub fn is_ticket_status(value: &str) -> bool {
    TICKET_STATUSES.contains(&value)
}

pub fn is_role(value: &str) -> bool {
    value == ROLE_USER || value == ROLE_ADMIN
}

/// Subscription tier. Limits how many portfolio projects a user may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Plus,
    Ultra,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Plus => "plus",
            Plan::Ultra => "ultra",
        }
    }

    pub fn project_limit(self) -> i64 {
        match self {
            Plan::Free => 2,
            Plan::Plus => 5,
            Plan::Ultra => 20,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "plus" => Ok(Plan::Plus),
            "ultra" => Ok(Plan::Ultra),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

/// Platform fee in basis points, rounded down, and the remainder paid out.
pub fn split_amount(gross: i64, fee_bps: u32) -> (i64, i64) {
    let fee = gross.saturating_mul(i64::from(fee_bps)) / 10_000;
    (fee, gross - fee)
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("user");
    }
    slug.truncate(120);
    slug
}

pub fn slug_with_suffix(base: &str) -> String {
    let mut bytes = [0u8; 3];
    OsRng.fill_bytes(&mut bytes);
    format!("{base}-{}", hex::encode(bytes))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
