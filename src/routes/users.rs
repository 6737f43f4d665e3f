use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::Plan,
    error::{AppError, AppResult},
    models::{NewUserProject, User, UserProject},
    schema::{user_projects, users},
    state::AppState,
    utils::{json::nullable_field, time::to_iso},
};

pub const MAX_SKILLS: usize = 30;

#[derive(Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub avatar_url: Option<String>,
}

#[derive(Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub plan: String,
    pub role: String,
    pub slug: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ProjectInfo {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub media: Value,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
    pub projects: Vec<ProjectInfo>,
    pub project_limit: i64,
}

#[derive(Serialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub avatar_url: Option<String>,
    pub country: Option<String>,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub plan: String,
    pub profile_url: Option<String>,
    pub projects: Vec<ProjectInfo>,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub link: Option<String>,
    #[serde(default)]
    pub media: Vec<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UpdateProfileChangeset {
    name: Option<String>,
    avatar_url: Option<Option<String>>,
    country: Option<Option<String>>,
    phone: Option<Option<String>>,
    bio: Option<Option<String>>,
    skills: Option<Vec<String>>,
    updated_at: NaiveDateTime,
}

pub async fn get_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(build_profile(&mut conn, record)?))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ProfileResponse>> {
    let name = match body.get("name") {
        None => None,
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Some(_) => return Err(AppError::bad_request("name must be a non-empty string")),
    };

    let skills = match body.get("skills") {
        None => None,
        Some(value) => Some(parse_skills(value).map_err(AppError::bad_request)?),
    };

    let changeset = UpdateProfileChangeset {
        name,
        avatar_url: nullable_field(&body, "avatar_url").map_err(AppError::bad_request)?,
        country: nullable_field(&body, "country").map_err(AppError::bad_request)?,
        phone: nullable_field(&body, "phone").map_err(AppError::bad_request)?,
        bio: nullable_field(&body, "bio").map_err(AppError::bad_request)?,
        skills,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    diesel::update(users::table.find(user.user_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let record: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(build_profile(&mut conn, record)?))
}

pub async fn add_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectInfo>)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let media = payload
        .media
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(str::to_owned)
        .collect::<Vec<_>>();

    let mut conn = state.db()?;
    let project = conn.transaction::<UserProject, AppError, _>(|conn| {
        let owner: User = users::table
            .find(user.user_id)
            .for_update()
            .first(conn)?;
        let plan = owner.plan.parse::<Plan>().unwrap_or(Plan::Free);

        let existing: i64 = user_projects::table
            .filter(user_projects::user_id.eq(owner.id))
            .count()
            .get_result(conn)?;
        if existing >= plan.project_limit() {
            return Err(AppError::conflict(format!(
                "the {plan} plan allows at most {} projects",
                plan.project_limit()
            )));
        }

        let new_project = NewUserProject {
            id: Uuid::new_v4(),
            user_id: owner.id,
            title: title.to_string(),
            description: payload.description.trim().to_string(),
            link: payload
                .link
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
            media: serde_json::to_value(&media)?,
        };

        diesel::insert_into(user_projects::table)
            .values(&new_project)
            .execute(conn)?;

        Ok(user_projects::table.find(new_project.id).first(conn)?)
    })?;

    info!(user_id = %user.user_id, project_id = %project.id, "portfolio project added");
    Ok((StatusCode::CREATED, Json(project_to_info(project))))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        user_projects::table
            .filter(user_projects::id.eq(project_id))
            .filter(user_projects::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_public_profile(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<PublicProfile>> {
    let mut conn = state.db()?;
    let record: User = users::table
        .filter(users::slug.eq(slug.trim().to_ascii_lowercase()))
        .first(&mut conn)?;
    let projects = load_projects(&mut conn, record.id)?;

    Ok(Json(PublicProfile {
        profile_url: state.config.profile_url(&record.slug),
        id: record.id,
        name: record.name,
        slug: record.slug,
        avatar_url: record.avatar_url,
        country: record.country,
        bio: record.bio,
        skills: record.skills,
        plan: record.plan,
        projects,
    }))
}

pub(crate) fn load_user_summaries(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<Vec<UserSummary>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<User> = users::table
        .filter(users::id.eq_any(ids))
        .load(conn)?;
    Ok(rows.into_iter().map(user_to_summary).collect())
}

pub(crate) fn user_to_summary(user: User) -> UserSummary {
    UserSummary {
        id: user.id,
        name: user.name,
        slug: user.slug,
        avatar_url: user.avatar_url,
    }
}

pub(crate) fn user_to_profile(user: User) -> UserProfile {
    UserProfile {
        id: user.id,
        name: user.name,
        email: user.email,
        avatar_url: user.avatar_url,
        country: user.country,
        phone: user.phone,
        bio: user.bio,
        skills: user.skills,
        plan: user.plan,
        role: user.role,
        slug: user.slug,
        created_at: to_iso(user.created_at),
    }
}

fn build_profile(conn: &mut PgConnection, record: User) -> AppResult<ProfileResponse> {
    let projects = load_projects(conn, record.id)?;
    let project_limit = record
        .plan
        .parse::<Plan>()
        .unwrap_or(Plan::Free)
        .project_limit();
    Ok(ProfileResponse {
        user: user_to_profile(record),
        projects,
        project_limit,
    })
}

fn load_projects(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<ProjectInfo>> {
    let rows: Vec<UserProject> = user_projects::table
        .filter(user_projects::user_id.eq(user_id))
        .order(user_projects::created_at.asc())
        .load(conn)?;
    Ok(rows.into_iter().map(project_to_info).collect())
}

fn project_to_info(project: UserProject) -> ProjectInfo {
    ProjectInfo {
        id: project.id,
        title: project.title,
        description: project.description,
        link: project.link,
        media: project.media,
        created_at: to_iso(project.created_at),
    }
}

fn parse_skills(value: &Value) -> Result<Vec<String>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "skills must be a list of strings".to_string())?;
    let mut skills: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let skill = item
            .as_str()
            .ok_or_else(|| "skills must be a list of strings".to_string())?
            .trim();
        if skill.is_empty() {
            continue;
        }
        if !skills.iter().any(|s| s.eq_ignore_ascii_case(skill)) {
            skills.push(skill.to_string());
        }
    }
    if skills.len() > MAX_SKILLS {
        return Err(format!("at most {MAX_SKILLS} skills are allowed"));
    }
    Ok(skills)
}
