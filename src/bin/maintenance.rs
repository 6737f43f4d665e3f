use std::env;

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cyphire::{
    auth::password::{hash_password, MIN_PASSWORD_LEN},
    config::AppConfig,
    db,
    domain::{normalize_email, Plan, ROLE_ADMIN},
    models::{NewUser, User},
    routes::auth::unique_slug,
    schema::users,
};

const USAGE: &str = "Usage:\n  maintenance create-admin <email> <password> [name]\n  maintenance set-plan <email> <plan>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["create-admin", email, password] => create_admin(email, password, None),
        ["create-admin", email, password, name] => create_admin(email, password, Some(*name)),
        ["set-plan", email, plan] => set_plan(email, plan),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded backend configuration"
    );
    let pool = db::init_pool(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

/// Creates an admin account, or promotes and re-keys an existing one.
fn create_admin(email: &str, password: &str, name: Option<&str>) -> Result<()> {
    let email = normalize_email(email);
    if email.is_empty() {
        bail!("email must not be empty");
    }
    if password.len() < MIN_PASSWORD_LEN {
        bail!("password must be at least {MIN_PASSWORD_LEN} characters");
    }
    let password_hash = hash_password(password)?;

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()
        .context("failed to look up user")?;

    if let Some(user) = existing {
        diesel::update(users::table.find(user.id))
            .set((
                users::role.eq(ROLE_ADMIN),
                users::password_hash.eq(Some(password_hash)),
                users::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .context("failed to promote user")?;
        println!("Promoted {email} to admin.");
        return Ok(());
    }

    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Administrator");
    let slug = unique_slug(&mut conn, name).map_err(|err| anyhow!(err.message().to_string()))?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.clone(),
        password_hash: Some(password_hash),
        country: None,
        phone: None,
        skills: Vec::new(),
        plan: Plan::Free.as_str().to_string(),
        role: ROLE_ADMIN.to_string(),
        slug,
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .context("failed to create admin user")?;

    println!("Created admin {email} ({}).", new_user.id);
    Ok(())
}

fn set_plan(email: &str, plan: &str) -> Result<()> {
    let plan: Plan = plan.parse().map_err(|err: String| anyhow!(err))?;
    let email = normalize_email(email);

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let updated = diesel::update(users::table.filter(users::email.eq(&email)))
        .set((
            users::plan.eq(plan.as_str()),
            users::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .context("failed to update plan")?;
    if updated == 0 {
        bail!("no user with email {email}");
    }

    println!("{email} is now on the {plan} plan.");
    Ok(())
}
