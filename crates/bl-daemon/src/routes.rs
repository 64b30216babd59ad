//! Axum router and all HTTP handlers for bl-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Caller identity arrives in the `x-principal-id` and
//! `x-session-id` headers set by the fronting authentication layer.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use bl_award::AwardOutcome;
use bl_schemas::{
    Bid, BidDraft, LogisticsProfile, NewShipment, PrincipalId, ProcureError, ProfileUpdate, Rfq,
    RfqDetails, RfqId, Shipment, ShipmentId,
};
use bl_store::{BidQuery, LiveQuery, LiveSource, RfqQuery, ShipmentQuery, SnapshotStream};
use bl_twofactor::{EnrollmentPayload, Session};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        ActivityRequest, AdvanceRequest, AwardRequest, BidListParams, CodeRequest,
        HealthResponse, NoteRequest, OkResponse, PublishResponse, RfqListParams,
        ShipmentListParams, TwoFactorStatusResponse, WithdrawRequest,
    },
    error::ApiError,
    state::{AppState, BusMsg},
};

pub const PRINCIPAL_HEADER: &str = "x-principal-id";
pub const SESSION_HEADER: &str = "x-session-id";

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(event_stream))
        // RFQs
        .route("/v1/rfqs", post(publish_rfq).get(list_rfqs))
        .route("/v1/rfqs/stream", get(stream_rfqs))
        .route("/v1/rfqs/:id", get(get_rfq))
        .route("/v1/rfqs/:id/close", post(close_rfq))
        .route("/v1/rfqs/:id/activity", post(record_activity))
        .route("/v1/rfqs/:id/award", post(award))
        // Bids
        .route("/v1/rfqs/:id/bids", put(submit_bid).get(list_rfq_bids))
        .route("/v1/rfqs/:id/bids/stream", get(stream_rfq_bids))
        .route("/v1/rfqs/:id/bids/withdraw", post(withdraw_bid))
        .route("/v1/bids", get(list_supplier_bids))
        .route("/v1/bids/stream", get(stream_supplier_bids))
        // Shipments
        .route("/v1/shipments", post(create_shipment).get(list_shipments))
        .route("/v1/shipments/stream", get(stream_shipments))
        .route("/v1/shipments/:id", get(get_shipment))
        .route("/v1/shipments/:id/advance", post(advance_shipment))
        .route("/v1/shipments/:id/notes", post(annotate_shipment))
        // Logistics profiles
        .route("/v1/logistics/profile", put(upsert_profile).get(own_profile))
        .route("/v1/logistics/profiles/:supplier", get(supplier_profile))
        .route("/v1/logistics/profiles/:supplier/stream", get(stream_profile))
        // Two-factor
        .route("/v1/session", delete(end_session))
        .route("/v1/2fa/status", get(two_factor_status))
        .route("/v1/2fa/enroll", post(two_factor_enroll))
        .route("/v1/2fa/confirm", post(two_factor_confirm))
        .route("/v1/2fa/challenge", post(two_factor_challenge))
        .route("/v1/2fa/disable", post(two_factor_disable))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

struct Caller {
    session_id: String,
    session: Session,
}

impl Caller {
    fn resolve(st: &AppState, headers: &HeaderMap) -> ApiResult<Self> {
        let principal = PrincipalId::new(required_header(headers, PRINCIPAL_HEADER)?);
        let session_id = required_header(headers, SESSION_HEADER)?;
        let session = st
            .sessions
            .resolve(&session_id, &principal, st.clock.as_ref())
            .map_err(|_| {
                ApiError::Unauthenticated("session id belongs to another principal".to_string())
            })?;
        Ok(Self {
            session_id,
            session,
        })
    }

    fn principal(&self) -> &PrincipalId {
        self.session.principal()
    }

    /// List filters naming a principal may only name the caller.
    fn ensure_self(&self, requested: &str) -> ApiResult<PrincipalId> {
        if requested == self.principal().as_str() {
            Ok(self.principal().clone())
        } else {
            Err(ProcureError::not_permitted("lists are only visible to their owner").into())
        }
    }
}

fn required_header(headers: &HeaderMap, name: &str) -> ApiResult<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {name} header")))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// RFQs
// ---------------------------------------------------------------------------

pub(crate) async fn publish_rfq(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(details): Json<RfqDetails>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let caller = Caller::resolve(&st, &headers)?;
    let rfq_id = st.rfqs.publish(caller.principal(), details).await?;
    Ok((StatusCode::CREATED, Json(PublishResponse { rfq_id })))
}

pub(crate) async fn get_rfq(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Rfq>> {
    Caller::resolve(&st, &headers)?;
    Ok(Json(st.rfqs.get(&RfqId::new(id)).await?))
}

fn rfq_list(st: &AppState, caller: &Caller, p: &RfqListParams) -> ApiResult<LiveQuery<RfqQuery>> {
    match (&p.buyer, p.open) {
        (Some(_), true) => Err(ApiError::BadRequest(
            "use either buyer or open=true, not both".to_string(),
        )),
        (Some(buyer), false) => Ok(st.rfqs.list_by_buyer(&caller.ensure_self(buyer)?)),
        (None, true) => Ok(st.rfqs.list_open()),
        (None, false) => Ok(st.rfqs.list_by_buyer(caller.principal())),
    }
}

pub(crate) async fn list_rfqs(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<RfqListParams>,
) -> ApiResult<Json<Vec<Rfq>>> {
    let caller = Caller::resolve(&st, &headers)?;
    snapshot(rfq_list(&st, &caller, &p)?).await
}

pub(crate) async fn stream_rfqs(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<RfqListParams>,
) -> ApiResult<Response> {
    let caller = Caller::resolve(&st, &headers)?;
    let live = rfq_list(&st, &caller, &p)?;
    Ok(sse_snapshots(live.subscribe(), st.heartbeat))
}

pub(crate) async fn close_rfq(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Rfq>> {
    let caller = Caller::resolve(&st, &headers)?;
    Ok(Json(st.rfqs.close(caller.principal(), &RfqId::new(id)).await?))
}

pub(crate) async fn record_activity(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ActivityRequest>,
) -> ApiResult<Json<OkResponse>> {
    let caller = Caller::resolve(&st, &headers)?;
    st.rfqs
        .record_activity(caller.principal(), &RfqId::new(id), &req.message)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn award(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AwardRequest>,
) -> ApiResult<Json<AwardOutcome>> {
    let caller = Caller::resolve(&st, &headers)?;
    let outcome = st
        .awards
        .award(&caller.session, &RfqId::new(id), &req.bid_id)
        .await?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

pub(crate) async fn submit_bid(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<BidDraft>,
) -> ApiResult<Json<Bid>> {
    let caller = Caller::resolve(&st, &headers)?;
    let bid = st
        .bids
        .submit_or_update(&RfqId::new(id), caller.principal(), draft)
        .await?;
    Ok(Json(bid))
}

pub(crate) async fn withdraw_bid(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<WithdrawRequest>>,
) -> ApiResult<Json<Bid>> {
    let caller = Caller::resolve(&st, &headers)?;
    let note = body.and_then(|Json(req)| req.note);
    let bid = st
        .bids
        .withdraw(&RfqId::new(id), caller.principal(), note)
        .await?;
    Ok(Json(bid))
}

/// Bids on an RFQ are visible to its buyer only.
async fn rfq_bids(st: &AppState, caller: &Caller, id: String) -> ApiResult<LiveQuery<BidQuery>> {
    let rfq = st.rfqs.get(&RfqId::new(id)).await?;
    rfq.ensure_owned_by(caller.principal())?;
    Ok(st.bids.list_for_rfq(&rfq.id))
}

pub(crate) async fn list_rfq_bids(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Bid>>> {
    let caller = Caller::resolve(&st, &headers)?;
    snapshot(rfq_bids(&st, &caller, id).await?).await
}

pub(crate) async fn stream_rfq_bids(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let caller = Caller::resolve(&st, &headers)?;
    let live = rfq_bids(&st, &caller, id).await?;
    Ok(sse_snapshots(live.subscribe(), st.heartbeat))
}

fn supplier_bids(st: &AppState, caller: &Caller, p: &BidListParams) -> ApiResult<LiveQuery<BidQuery>> {
    let supplier = match &p.supplier {
        Some(s) => caller.ensure_self(s)?,
        None => caller.principal().clone(),
    };
    Ok(st.bids.list_for_supplier(&supplier))
}

pub(crate) async fn list_supplier_bids(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<BidListParams>,
) -> ApiResult<Json<Vec<Bid>>> {
    let caller = Caller::resolve(&st, &headers)?;
    snapshot(supplier_bids(&st, &caller, &p)?).await
}

pub(crate) async fn stream_supplier_bids(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<BidListParams>,
) -> ApiResult<Response> {
    let caller = Caller::resolve(&st, &headers)?;
    let live = supplier_bids(&st, &caller, &p)?;
    Ok(sse_snapshots(live.subscribe(), st.heartbeat))
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

pub(crate) async fn create_shipment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewShipment>,
) -> ApiResult<(StatusCode, Json<Shipment>)> {
    let caller = Caller::resolve(&st, &headers)?;
    let shipment = st.shipments.create(&caller.session, new).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn shipment_list(
    st: &AppState,
    caller: &Caller,
    p: &ShipmentListParams,
) -> ApiResult<LiveQuery<ShipmentQuery>> {
    match (&p.buyer, &p.supplier, &p.rfq) {
        (Some(b), None, None) => Ok(st.shipments.list_for_buyer(&caller.ensure_self(b)?)),
        (None, Some(s), None) => Ok(st.shipments.list_for_supplier(&caller.ensure_self(s)?)),
        (None, None, Some(r)) => {
            let rfq = st.rfqs.get(&RfqId::new(r.as_str())).await?;
            rfq.ensure_owned_by(caller.principal())?;
            Ok(st.shipments.list_for_rfq(&rfq.id))
        }
        _ => Err(ApiError::BadRequest(
            "exactly one of buyer, supplier or rfq is required".to_string(),
        )),
    }
}

pub(crate) async fn list_shipments(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<ShipmentListParams>,
) -> ApiResult<Json<Vec<Shipment>>> {
    let caller = Caller::resolve(&st, &headers)?;
    snapshot(shipment_list(&st, &caller, &p).await?).await
}

pub(crate) async fn stream_shipments(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<ShipmentListParams>,
) -> ApiResult<Response> {
    let caller = Caller::resolve(&st, &headers)?;
    let live = shipment_list(&st, &caller, &p).await?;
    Ok(sse_snapshots(live.subscribe(), st.heartbeat))
}

pub(crate) async fn get_shipment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Shipment>> {
    let caller = Caller::resolve(&st, &headers)?;
    let shipment = st.shipments.get(&ShipmentId::new(id)).await?;
    shipment.ensure_party(caller.principal())?;
    Ok(Json(shipment))
}

pub(crate) async fn advance_shipment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> ApiResult<Json<Shipment>> {
    let caller = Caller::resolve(&st, &headers)?;
    let shipment = st
        .shipments
        .advance(&caller.session, &ShipmentId::new(id), req.status, req.note)
        .await?;
    Ok(Json(shipment))
}

pub(crate) async fn annotate_shipment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<Json<Shipment>> {
    let caller = Caller::resolve(&st, &headers)?;
    let shipment = st
        .shipments
        .annotate(&caller.session, &ShipmentId::new(id), &req.note)
        .await?;
    Ok(Json(shipment))
}

// ---------------------------------------------------------------------------
// Logistics profiles
// ---------------------------------------------------------------------------

pub(crate) async fn upsert_profile(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<LogisticsProfile>> {
    let caller = Caller::resolve(&st, &headers)?;
    Ok(Json(st.shipments.upsert_profile(caller.principal(), update).await?))
}

async fn profile_of(st: &AppState, supplier: &PrincipalId) -> ApiResult<Json<LogisticsProfile>> {
    st.shipments
        .profile(supplier)
        .await?
        .map(Json)
        .ok_or_else(|| ProcureError::not_found("logistics_profile", supplier.as_str()).into())
}

pub(crate) async fn own_profile(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<LogisticsProfile>> {
    let caller = Caller::resolve(&st, &headers)?;
    profile_of(&st, caller.principal()).await
}

pub(crate) async fn supplier_profile(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(supplier): Path<String>,
) -> ApiResult<Json<LogisticsProfile>> {
    Caller::resolve(&st, &headers)?;
    profile_of(&st, &PrincipalId::new(supplier)).await
}

pub(crate) async fn stream_profile(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(supplier): Path<String>,
) -> ApiResult<Response> {
    Caller::resolve(&st, &headers)?;
    let live = st.shipments.watch_profile(&PrincipalId::new(supplier));
    Ok(sse_snapshots(live.subscribe(), st.heartbeat))
}

// ---------------------------------------------------------------------------
// Two-factor
// ---------------------------------------------------------------------------

pub(crate) async fn two_factor_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<TwoFactorStatusResponse>> {
    let caller = Caller::resolve(&st, &headers)?;
    let status = st.gate.status(caller.principal()).await?;
    Ok(Json(TwoFactorStatusResponse {
        status,
        session_verified: caller.session.is_second_factor_verified(),
    }))
}

pub(crate) async fn two_factor_enroll(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<EnrollmentPayload>> {
    let caller = Caller::resolve(&st, &headers)?;
    Ok(Json(st.gate.begin_enrollment(&caller.session).await?))
}

pub(crate) async fn two_factor_confirm(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CodeRequest>,
) -> ApiResult<Json<OkResponse>> {
    let Caller {
        session_id,
        mut session,
    } = Caller::resolve(&st, &headers)?;
    st.gate.confirm_enrollment(&mut session, &req.code).await?;
    st.sessions.save(&session_id, session, st.clock.as_ref());
    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn two_factor_challenge(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CodeRequest>,
) -> ApiResult<Json<OkResponse>> {
    let Caller {
        session_id,
        mut session,
    } = Caller::resolve(&st, &headers)?;
    st.gate.challenge(&mut session, &req.code).await?;
    info!(principal = %session.principal(), "session passed second-factor challenge");
    st.sessions.save(&session_id, session, st.clock.as_ref());
    Ok(Json(OkResponse { ok: true }))
}

pub(crate) async fn two_factor_disable(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<OkResponse>> {
    let caller = Caller::resolve(&st, &headers)?;
    st.gate.disable(&caller.session).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// Drop the caller's session so the id starts over unverified.
pub(crate) async fn end_session(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<OkResponse>> {
    let caller = Caller::resolve(&st, &headers)?;
    st.sessions.end(&caller.session_id);
    info!(principal = %caller.principal(), "session ended");
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Live queries over SSE
// ---------------------------------------------------------------------------

async fn snapshot<Q>(live: LiveQuery<Q>) -> ApiResult<Json<Vec<Q::Item>>>
where
    Q: LiveSource,
    Q::Item: Serialize,
{
    let items = live.snapshot().await.map_err(ProcureError::from)?;
    Ok(Json(items))
}

/// One `snapshot` event per delivered list; store failures become `error`
/// events and the stream keeps running.
fn sse_snapshots<T>(snapshots: SnapshotStream<T>, heartbeat: Duration) -> Response
where
    T: Serialize + Send + 'static,
{
    let events = snapshots.map(|snap| {
        let event = match snap {
            Ok(items) => Event::default()
                .event("snapshot")
                .json_data(&items)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok::<_, Infallible>(event)
    });
    sse_response(Sse::new(events).keep_alive(KeepAlive::new().interval(heartbeat)))
}

fn sse_response(sse: impl IntoResponse) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    (headers, sse).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn event_stream(State(st): State<Arc<AppState>>) -> Response {
    let events = bus_to_sse(st.bus.subscribe());
    sse_response(Sse::new(events).keep_alive(KeepAlive::new().interval(st.heartbeat)))
}

fn bus_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Event { .. } => "event",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged
        }
    })
}
