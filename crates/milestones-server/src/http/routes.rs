use super::{AppResult, AppState, JsonResponse};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use milestones_core::{
    CourseContentMilestoneRecord, CourseMilestoneRecord, EventOutcome, FulfillmentPaths,
    Milestone, MilestoneId, MilestoneSpec, PlatformEvent, UserId, UserRef,
};
use serde::{Deserialize, Serialize};

type Done = Json<JsonResponse<()>>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/milestones", get(list_milestones).post(create_milestone))
        .route(
            "/milestones/:id",
            get(get_milestone).put(update_milestone).delete(delete_milestone),
        )
        .route("/milestones/:id/courses", get(milestone_courses))
        .route("/milestones/:id/content", get(milestone_content))
        .route(
            "/course-milestones",
            get(list_course_milestones)
                .post(link_course_milestone)
                .delete(unlink_course_milestone),
        )
        .route("/course-milestones/required", get(required_milestones))
        .route("/course-milestones/paths", get(fulfillment_paths))
        .route(
            "/content-milestones",
            get(list_content_milestones)
                .post(link_content_milestone)
                .delete(unlink_content_milestone),
        )
        .route("/users/:id/milestones", get(user_milestones))
        .route(
            "/users/:id/milestones/:milestone_id",
            put(grant_user_milestone).delete(revoke_user_milestone),
        )
        .route("/references/courses", delete(remove_course_references))
        .route("/references/content", delete(remove_content_references))
        .route("/events", post(handle_event))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: String,
    uptime_seconds: u64,
    stats: StatsData,
}

#[derive(Serialize)]
struct StatsData {
    relationship_type_count: u64,
    milestone_count: u64,
    active_milestone_count: u64,
    course_link_count: u64,
    content_link_count: u64,
    user_link_count: u64,
    db_size_bytes: u64,
}

async fn health(State(state): State<AppState>) -> AppResult<Json<JsonResponse<HealthResponse>>> {
    let stats = state.milestones.stats()?;

    Ok(Json(JsonResponse::ok(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        stats: StatsData {
            relationship_type_count: stats.relationship_type_count,
            milestone_count: stats.milestone_count,
            active_milestone_count: stats.active_milestone_count,
            course_link_count: stats.course_link_count,
            content_link_count: stats.content_link_count,
            user_link_count: stats.user_link_count,
            db_size_bytes: stats.db_size_bytes,
        },
    })))
}

// === Milestones ===

#[derive(Deserialize)]
struct NamespaceQuery {
    namespace: String,
}

async fn list_milestones(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> AppResult<Json<JsonResponse<Vec<Milestone>>>> {
    let milestones = state.milestones.get_milestones(&query.namespace)?;
    Ok(Json(JsonResponse::ok(milestones)))
}

async fn create_milestone(
    State(state): State<AppState>,
    Json(spec): Json<MilestoneSpec>,
) -> AppResult<Json<JsonResponse<Milestone>>> {
    let milestone = state.milestones.add_milestone(&spec)?;
    Ok(Json(JsonResponse::ok(milestone)))
}

async fn get_milestone(
    State(state): State<AppState>,
    Path(id): Path<MilestoneId>,
) -> AppResult<Json<JsonResponse<Milestone>>> {
    let milestone = state.milestones.get_milestone(id)?;
    Ok(Json(JsonResponse::ok(milestone)))
}

async fn update_milestone(
    State(state): State<AppState>,
    Path(id): Path<MilestoneId>,
    Json(mut spec): Json<MilestoneSpec>,
) -> AppResult<Json<JsonResponse<Milestone>>> {
    spec.id = Some(id);
    let milestone = state.milestones.edit_milestone(&spec)?;
    Ok(Json(JsonResponse::ok(milestone)))
}

async fn delete_milestone(
    State(state): State<AppState>,
    Path(id): Path<MilestoneId>,
) -> AppResult<Done> {
    state.milestones.remove_milestone(id)?;
    Ok(Json(JsonResponse::<()>::done()))
}

#[derive(Deserialize)]
struct RelationshipQuery {
    relationship: Option<String>,
}

async fn milestone_courses(
    State(state): State<AppState>,
    Path(id): Path<MilestoneId>,
    Query(query): Query<RelationshipQuery>,
) -> AppResult<Json<JsonResponse<Vec<CourseMilestoneRecord>>>> {
    let records = state
        .milestones
        .get_milestone_courses(id, query.relationship.as_deref())?;
    Ok(Json(JsonResponse::ok(records)))
}

async fn milestone_content(
    State(state): State<AppState>,
    Path(id): Path<MilestoneId>,
    Query(query): Query<RelationshipQuery>,
) -> AppResult<Json<JsonResponse<Vec<CourseContentMilestoneRecord>>>> {
    let records = state
        .milestones
        .get_milestone_course_content(id, query.relationship.as_deref())?;
    Ok(Json(JsonResponse::ok(records)))
}

// === Course links ===

#[derive(Deserialize)]
struct CourseMilestonesQuery {
    /// One course key, or several separated by commas
    course: String,
    relationship: Option<String>,
    user_id: Option<UserId>,
}

async fn list_course_milestones(
    State(state): State<AppState>,
    Query(query): Query<CourseMilestonesQuery>,
) -> AppResult<Json<JsonResponse<Vec<CourseMilestoneRecord>>>> {
    let courses: Vec<&str> = query.course.split(',').map(str::trim).collect();
    let user = query.user_id.map(UserRef::new);
    let records = state.milestones.get_courses_milestones(
        &courses,
        query.relationship.as_deref(),
        user.as_ref(),
    )?;
    Ok(Json(JsonResponse::ok(records)))
}

#[derive(Deserialize)]
struct CourseLinkRequest {
    course: String,
    relationship: String,
    milestone_id: MilestoneId,
}

async fn link_course_milestone(
    State(state): State<AppState>,
    Json(req): Json<CourseLinkRequest>,
) -> AppResult<Done> {
    state
        .milestones
        .add_course_milestone(&req.course, &req.relationship, req.milestone_id)?;
    Ok(Json(JsonResponse::<()>::done()))
}

#[derive(Deserialize)]
struct CourseUnlinkQuery {
    course: String,
    milestone_id: MilestoneId,
}

async fn unlink_course_milestone(
    State(state): State<AppState>,
    Query(query): Query<CourseUnlinkQuery>,
) -> AppResult<Done> {
    state
        .milestones
        .remove_course_milestone(&query.course, query.milestone_id)?;
    Ok(Json(JsonResponse::<()>::done()))
}

#[derive(Deserialize)]
struct CourseUserQuery {
    course: String,
    user_id: UserId,
}

async fn required_milestones(
    State(state): State<AppState>,
    Query(query): Query<CourseUserQuery>,
) -> AppResult<Json<JsonResponse<Vec<CourseMilestoneRecord>>>> {
    let records = state
        .milestones
        .get_course_required_milestones(&query.course, &UserRef::new(query.user_id))?;
    Ok(Json(JsonResponse::ok(records)))
}

async fn fulfillment_paths(
    State(state): State<AppState>,
    Query(query): Query<CourseUserQuery>,
) -> AppResult<Json<JsonResponse<FulfillmentPaths>>> {
    let paths = state
        .milestones
        .get_course_milestones_fulfillment_paths(&query.course, &UserRef::new(query.user_id))?;
    Ok(Json(JsonResponse::ok(paths)))
}

// === Course content links ===

#[derive(Deserialize)]
struct ContentMilestonesQuery {
    course: Option<String>,
    content: Option<String>,
    relationship: Option<String>,
}

async fn list_content_milestones(
    State(state): State<AppState>,
    Query(query): Query<ContentMilestonesQuery>,
) -> AppResult<Json<JsonResponse<Vec<CourseContentMilestoneRecord>>>> {
    let records = state.milestones.get_course_content_milestones(
        query.course.as_deref(),
        query.content.as_deref(),
        query.relationship.as_deref(),
    )?;
    Ok(Json(JsonResponse::ok(records)))
}

#[derive(Deserialize)]
struct ContentLinkRequest {
    course: String,
    content: String,
    relationship: String,
    milestone_id: MilestoneId,
}

async fn link_content_milestone(
    State(state): State<AppState>,
    Json(req): Json<ContentLinkRequest>,
) -> AppResult<Done> {
    state.milestones.add_course_content_milestone(
        &req.course,
        &req.content,
        &req.relationship,
        req.milestone_id,
    )?;
    Ok(Json(JsonResponse::<()>::done()))
}

#[derive(Deserialize)]
struct ContentUnlinkQuery {
    course: String,
    content: String,
    milestone_id: MilestoneId,
}

async fn unlink_content_milestone(
    State(state): State<AppState>,
    Query(query): Query<ContentUnlinkQuery>,
) -> AppResult<Done> {
    state.milestones.remove_course_content_milestone(
        &query.course,
        &query.content,
        query.milestone_id,
    )?;
    Ok(Json(JsonResponse::<()>::done()))
}

// === User links ===

async fn user_milestones(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<JsonResponse<Vec<Milestone>>>> {
    let milestones = state
        .milestones
        .get_user_milestones(&UserRef::new(user_id), None)?;
    Ok(Json(JsonResponse::ok(milestones)))
}

async fn grant_user_milestone(
    State(state): State<AppState>,
    Path((user_id, milestone_id)): Path<(UserId, MilestoneId)>,
) -> AppResult<Done> {
    state
        .milestones
        .add_user_milestone(&UserRef::new(user_id), milestone_id)?;
    Ok(Json(JsonResponse::<()>::done()))
}

async fn revoke_user_milestone(
    State(state): State<AppState>,
    Path((user_id, milestone_id)): Path<(UserId, MilestoneId)>,
) -> AppResult<Done> {
    state
        .milestones
        .remove_user_milestone(&UserRef::new(user_id), milestone_id)?;
    Ok(Json(JsonResponse::<()>::done()))
}

// === Cleanup ===

#[derive(Serialize)]
struct RemovedResponse {
    links_removed: usize,
}

#[derive(Deserialize)]
struct CourseQuery {
    course: String,
}

async fn remove_course_references(
    State(state): State<AppState>,
    Query(query): Query<CourseQuery>,
) -> AppResult<Json<JsonResponse<RemovedResponse>>> {
    let links_removed = state.milestones.remove_course_references(&query.course)?;
    Ok(Json(JsonResponse::ok(RemovedResponse { links_removed })))
}

#[derive(Deserialize)]
struct ContentQuery {
    content: String,
}

async fn remove_content_references(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> AppResult<Json<JsonResponse<RemovedResponse>>> {
    let links_removed = state.milestones.remove_content_references(&query.content)?;
    Ok(Json(JsonResponse::ok(RemovedResponse { links_removed })))
}

async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<PlatformEvent>,
) -> AppResult<Json<JsonResponse<EventOutcome>>> {
    let outcome = state.milestones.handle_event(&event)?;
    Ok(Json(JsonResponse::ok(outcome)))
}
