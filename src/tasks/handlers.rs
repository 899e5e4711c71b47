use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::dto::{MessageResponse, Pagination},
    auth::extractors::AuthUser,
    error::ApiError,
    state::AppState,
    tasks::dto::{
        CreateTaskRequest, ListTasksQuery, TaskDataResponse, TaskListResponse, TaskStats,
        TaskStatsResponse, UpdateTaskRequest,
    },
    tasks::repo_types::{Priority, Status, Task},
};

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/stats", get(task_stats))
        .route(
            "/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
}

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[instrument(skip(state, auth))]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let AuthUser(_user) = auth;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = (page - 1) * limit;
    let search = query.search.as_deref().filter(|s| !s.is_empty());

    let data = Task::list(
        &state.db,
        query.status,
        query.priority,
        search,
        limit,
        offset,
    )
    .await?;
    let total = Task::count(&state.db, query.status, query.priority, search).await?;

    Ok(Json(TaskListResponse {
        success: true,
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}

#[instrument(skip(state, auth, payload))]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskDataResponse>), ApiError> {
    let AuthUser(user) = auth;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("Title is required".into()));
    }

    let task = Task::create(
        &state.db,
        title,
        payload.description.as_deref(),
        payload.status.unwrap_or(Status::Todo),
        payload.priority.unwrap_or(Priority::Medium),
        user.id,
        payload.assigned_to,
        payload.due_date,
    )
    .await?;

    info!(task_id = %task.id, user_id = %user.id, "task created");
    Ok((
        StatusCode::CREATED,
        Json(TaskDataResponse {
            success: true,
            data: task,
        }),
    ))
}

#[instrument(skip(state, auth))]
pub async fn task_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TaskStatsResponse>, ApiError> {
    let AuthUser(_user) = auth;
    let rows = Task::stats(&state.db).await?;

    let mut stats = TaskStats {
        todo: 0,
        in_progress: 0,
        done: 0,
    };
    for (status, count) in rows {
        match status.as_str() {
            "todo" => stats.todo = count,
            "in-progress" => stats.in_progress = count,
            "done" => stats.done = count,
            other => warn!(status = other, "unexpected status in stats"),
        }
    }

    Ok(Json(TaskStatsResponse {
        success: true,
        data: stats,
    }))
}

#[instrument(skip(state, auth))]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskDataResponse>, ApiError> {
    let AuthUser(_user) = auth;
    let task = Task::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound("Task not found"))?;

    Ok(Json(TaskDataResponse {
        success: true,
        data: task,
    }))
}

#[instrument(skip(state, auth, payload))]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<TaskDataResponse>, ApiError> {
    let AuthUser(user) = auth;

    let task = Task::update(
        &state.db,
        id,
        payload.title.as_deref(),
        payload.description.as_deref(),
        payload.status,
        payload.priority,
        payload.assigned_to,
        payload.due_date,
    )
    .await?
    .ok_or(ApiError::NotFound("Task not found"))?;

    info!(task_id = %id, user_id = %user.id, "task updated");
    Ok(Json(TaskDataResponse {
        success: true,
        data: task,
    }))
}

#[instrument(skip(state, auth))]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let AuthUser(user) = auth;
    let deleted = Task::soft_delete(&state.db, id).await?;
    if !deleted {
        return Err(ApiError::NotFound("Task not found"));
    }

    info!(task_id = %id, user_id = %user.id, "task deleted");
    Ok(Json(MessageResponse {
        success: true,
        message: "Task deleted successfully",
    }))
}
