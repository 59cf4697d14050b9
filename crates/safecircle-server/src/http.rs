use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, HealthReport, InboxEntry};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use safecircle_core::{
    Backend, CheckInSession, Coordinate, CreateIncidentRequest, HelperStatus, HelperView,
    Incident, IncidentId, IncidentType, Notification, Resolution, ServiceTag, User, UserId,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_INBOX_LIMIT: usize = 50;

#[derive(Deserialize)]
struct IncidentsQuery {
    /// Include resolved incidents.
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIncidentBody {
    #[serde(flatten)]
    request: CreateIncidentRequest,
    #[serde(default)]
    services: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelperBody {
    user_id: UserId,
}

#[derive(Deserialize)]
struct ChatBody {
    sender: UserId,
    message: String,
}

#[derive(Deserialize)]
struct ServiceBody {
    service: String,
}

#[derive(Deserialize)]
struct ViewQuery {
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Deserialize)]
struct InboxQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct BadgeBody {
    badge: String,
    #[serde(default)]
    points: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartCheckInBody {
    destination: String,
    duration_seconds: i64,
    #[serde(default)]
    emergency_type: Option<String>,
}

#[derive(Deserialize)]
struct ExtendBody {
    seconds: Option<u64>,
}

#[derive(Serialize)]
struct ResolutionResponse {
    applied: bool,
    session: CheckInSession,
}

impl From<Resolution> for ResolutionResponse {
    fn from(resolution: Resolution) -> Self {
        Self {
            applied: resolution.was_applied(),
            session: resolution.session().clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/incidents",
            get(list_incidents_handler).post(create_incident_handler),
        )
        .route("/api/incidents/:id", get(get_incident_handler))
        .route(
            "/api/incidents/:id/helpers",
            get(roster_handler).post(join_handler),
        )
        .route(
            "/api/incidents/:id/helpers/:user_id",
            delete(leave_handler),
        )
        .route(
            "/api/incidents/:id/helpers/:user_id/arrived",
            post(arrived_handler),
        )
        .route("/api/incidents/:id/chat", post(chat_handler))
        .route("/api/incidents/:id/resolve", post(resolve_handler))
        .route("/api/incidents/:id/services", post(service_handler))
        .route("/api/incidents/:id/view/:user_id", get(view_handler))
        .route("/api/users", get(list_users_handler))
        .route("/api/users/:id/location", put(location_handler))
        .route("/api/users/:id/notifications", get(inbox_handler))
        .route("/api/users/:id/badges", post(badge_handler))
        .route(
            "/api/users/:id/checkin",
            get(checkin_status_handler)
                .post(checkin_start_handler)
                .delete(checkin_cancel_handler),
        )
        .route("/api/users/:id/checkin/extend", post(checkin_extend_handler))
        .route("/api/users/:id/checkin/confirm", post(checkin_confirm_handler))
        .route("/api/users/:id/logout", post(logout_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn list_incidents_handler(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> ApiResult<Json<Vec<Incident>>> {
    let incidents = if query.all {
        state.backend().list_incidents()?
    } else {
        state.backend().incidents.list_active()
    };
    Ok(Json(incidents))
}

async fn create_incident_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateIncidentBody>,
) -> ApiResult<(StatusCode, Json<Incident>)> {
    let services = body
        .services
        .iter()
        .map(|s| s.parse::<ServiceTag>())
        .collect::<Result<Vec<_>, _>>()?;
    let incident = state.dispatcher.raise_incident(body.request, &services)?;
    Ok((StatusCode::CREATED, Json(incident)))
}

async fn get_incident_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.backend().get_incident(&id)?))
}

async fn roster_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<Json<Vec<HelperStatus>>> {
    Ok(Json(state.roster(&id)?))
}

async fn join_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(body): Json<HelperBody>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.join(&id, &body.user_id)?))
}

async fn leave_handler(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(IncidentId, UserId)>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.leave(&id, &user_id)?))
}

async fn arrived_handler(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(IncidentId, UserId)>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.arrive(&id, &user_id)?))
}

async fn chat_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.chat(&id, &body.sender, &body.message)?))
}

async fn resolve_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.resolve(&id)?))
}

async fn service_handler(
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(body): Json<ServiceBody>,
) -> ApiResult<Json<Incident>> {
    let service: ServiceTag = body.service.parse()?;
    Ok(Json(state.notify_service(&id, service)?))
}

async fn view_handler(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(IncidentId, UserId)>,
    Query(query): Query<ViewQuery>,
) -> ApiResult<Json<HelperView>> {
    let at = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)?),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "lat and lng must be given together".to_string(),
            ))
        }
    };
    Ok(Json(state.view(&id, &user_id, at)?))
}

async fn list_users_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.backend().list_users()?))
}

async fn location_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(location): Json<Coordinate>,
) -> ApiResult<StatusCode> {
    state.backend().update_user_location(&id, location)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn inbox_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<Vec<InboxEntry>>> {
    state.dispatcher.users().get(&id)?;
    let limit = query.limit.unwrap_or(DEFAULT_INBOX_LIMIT);
    Ok(Json(state.dispatcher.inbox(&id, limit)))
}

async fn badge_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(body): Json<BadgeBody>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.award_badge(&id, &body.badge, body.points)?))
}

async fn checkin_status_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<CheckInSession>> {
    Ok(Json(state.checkin_timer(&id)?.session()))
}

async fn checkin_start_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(body): Json<StartCheckInBody>,
) -> ApiResult<(StatusCode, Json<CheckInSession>)> {
    let emergency_type = match body.emergency_type.as_deref() {
        Some(raw) => raw.parse()?,
        None => IncidentType::Other,
    };
    let session = state.checkin_timer(&id)?.start(
        &body.destination,
        body.duration_seconds,
        emergency_type,
    )?;
    crate::metrics::record_checkin_started();
    Ok((StatusCode::CREATED, Json(session)))
}

async fn checkin_cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<ResolutionResponse>> {
    Ok(Json(state.checkin_timer(&id)?.cancel()?.into()))
}

async fn checkin_confirm_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<ResolutionResponse>> {
    Ok(Json(state.checkin_timer(&id)?.check_in()?.into()))
}

async fn checkin_extend_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    body: Option<Json<ExtendBody>>,
) -> ApiResult<Json<CheckInSession>> {
    let timer = state.checkin_timer(&id)?;
    let session = match body.and_then(|Json(b)| b.seconds) {
        Some(seconds) => timer.extend(seconds)?,
        None => timer.extend_default()?,
    };
    Ok(Json(session))
}

async fn logout_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<StatusCode> {
    state.sign_out(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
