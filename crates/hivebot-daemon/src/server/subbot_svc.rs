//! `SubbotService` gRPC implementation.

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

use hivebot_proto::v1::{
    DeleteSubbotRequest, DeleteSubbotResponse, EventRecord, ExternalEventRequest,
    ExternalEventResponse, GetSubbotRequest, GetSubbotResponse, LaunchRequest, LaunchResponse,
    ListSubbotsRequest, ListSubbotsResponse, QueryEventsRequest, QueryEventsResponse, SubbotInfo,
    SubbotRecord, SubbotStatus as ProtoSubbotStatus, SubscribeRequest,
    subbot_service_server::SubbotService,
};

use crate::gateway::EventGateway;
use crate::launch::{LaunchCoordinator, LaunchSpec};
use crate::storage::{Database, SubbotEventRow, SubbotRow};
use crate::supervisor::{SubbotError, SubbotSupervisor};

/// `SubbotService` implementation backed by the launch coordinator and
/// worker supervisor.
pub struct SubbotServiceImpl {
    db: Database,
    coordinator: Arc<LaunchCoordinator>,
    supervisor: Arc<SubbotSupervisor>,
    gateway: Arc<EventGateway>,
}

impl SubbotServiceImpl {
    /// Create a new `SubbotServiceImpl`.
    pub const fn new(
        db: Database,
        coordinator: Arc<LaunchCoordinator>,
        supervisor: Arc<SubbotSupervisor>,
        gateway: Arc<EventGateway>,
    ) -> Self {
        Self {
            db,
            coordinator,
            supervisor,
            gateway,
        }
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<EventRecord, Status>> + Send>>;

/// Map a `SubbotError` to a gRPC `Status`.
fn subbot_err_to_status(e: &SubbotError) -> Status {
    match e {
        SubbotError::Validation { .. } => Status::invalid_argument(e.to_string()),
        SubbotError::QuotaExceeded { .. } => Status::resource_exhausted(e.to_string()),
        SubbotError::NotFound { .. } => Status::not_found(e.to_string()),
        SubbotError::Unauthorized { .. } => Status::permission_denied(e.to_string()),
        SubbotError::SpawnFailed { .. } => Status::internal(e.to_string()),
        SubbotError::Database(db_err) => {
            use crate::storage::DatabaseError;
            match db_err {
                DatabaseError::NotFound(_) => Status::not_found(e.to_string()),
                _ => Status::internal(e.to_string()),
            }
        }
    }
}

/// Convert a DB status string to a proto `SubbotStatus`.
fn status_str_to_proto(s: &str) -> i32 {
    match s {
        "launching" => ProtoSubbotStatus::Launching.into(),
        "pending" => ProtoSubbotStatus::Pending.into(),
        "connected" => ProtoSubbotStatus::Connected.into(),
        "disconnected" => ProtoSubbotStatus::Disconnected.into(),
        "error" => ProtoSubbotStatus::Error.into(),
        "stopped" => ProtoSubbotStatus::Stopped.into(),
        "deleted" => ProtoSubbotStatus::Deleted.into(),
        _ => ProtoSubbotStatus::Unspecified.into(),
    }
}

const fn timestamp(seconds: i64) -> prost_types::Timestamp {
    prost_types::Timestamp { seconds, nanos: 0 }
}

fn row_to_proto(row: SubbotRow) -> SubbotRecord {
    SubbotRecord {
        code: row.code,
        kind: row.kind,
        status: status_str_to_proto(&row.status),
        owner_id: row.owner_id,
        requester_chat: row.requester_chat,
        target_number: row.target_number.unwrap_or_default(),
        metadata: row.metadata,
        created_at: Some(timestamp(row.created_at)),
        updated_at: Some(timestamp(row.updated_at)),
        last_heartbeat: Some(timestamp(row.last_heartbeat)),
    }
}

fn event_row_to_proto(row: SubbotEventRow) -> EventRecord {
    EventRecord {
        id: row.id,
        code: row.code,
        event: row.event,
        payload: row.payload,
        created_at: Some(timestamp(row.created_at)),
    }
}

#[tonic::async_trait]
impl SubbotService for SubbotServiceImpl {
    type SubscribeStream = EventStream;

    #[instrument(skip(self, request), fields(rpc = "Launch"))]
    async fn launch(
        &self,
        request: Request<LaunchRequest>,
    ) -> Result<Response<LaunchResponse>, Status> {
        let req = request.into_inner();

        if req.kind.is_empty() {
            return Err(Status::invalid_argument("kind must not be empty"));
        }
        if req.created_by.is_empty() {
            return Err(Status::invalid_argument("created_by must not be empty"));
        }
        if req.requester_chat.is_empty() {
            return Err(Status::invalid_argument("requester_chat must not be empty"));
        }

        let metadata = if req.metadata.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&req.metadata)
                .map_err(|e| Status::invalid_argument(format!("metadata is not valid JSON: {e}")))?
        };

        let spec = LaunchSpec {
            kind: req.kind,
            created_by: req.created_by,
            requester_chat: req.requester_chat,
            target_number: if req.target_number.is_empty() {
                None
            } else {
                Some(req.target_number)
            },
            metadata,
        };

        let row = self
            .coordinator
            .launch(spec)
            .await
            .map_err(|e| subbot_err_to_status(&e))?;

        info!(code = %row.code, "Subbot launch accepted");

        Ok(Response::new(LaunchResponse {
            record: Some(row_to_proto(row)),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "Delete"))]
    async fn delete(
        &self,
        request: Request<DeleteSubbotRequest>,
    ) -> Result<Response<DeleteSubbotResponse>, Status> {
        let req = request.into_inner();

        if req.code.is_empty() {
            return Err(Status::invalid_argument("code must not be empty"));
        }

        let deleted = self
            .supervisor
            .delete(&req.code)
            .await
            .map_err(|e| subbot_err_to_status(&e))?;

        Ok(Response::new(DeleteSubbotResponse { deleted }))
    }

    #[instrument(skip(self, request), fields(rpc = "Get"))]
    async fn get(
        &self,
        request: Request<GetSubbotRequest>,
    ) -> Result<Response<GetSubbotResponse>, Status> {
        let req = request.into_inner();

        if req.code.is_empty() {
            return Err(Status::invalid_argument("code must not be empty"));
        }

        let row = self
            .db
            .get_subbot(&req.code)
            .await
            .map_err(|e| Status::internal(e.to_string()))?
            .ok_or_else(|| Status::not_found(format!("Subbot not found: {}", req.code)))?;

        Ok(Response::new(GetSubbotResponse {
            record: Some(row_to_proto(row)),
        }))
    }

    #[instrument(skip(self, _request), fields(rpc = "List"))]
    async fn list(
        &self,
        _request: Request<ListSubbotsRequest>,
    ) -> Result<Response<ListSubbotsResponse>, Status> {
        let entries = self
            .supervisor
            .list_with_live_flag()
            .await
            .map_err(|e| subbot_err_to_status(&e))?;

        let subbots = entries
            .into_iter()
            .map(|(row, online)| SubbotInfo {
                record: Some(row_to_proto(row)),
                online,
            })
            .collect();

        Ok(Response::new(ListSubbotsResponse { subbots }))
    }

    #[instrument(skip(self, request), fields(rpc = "RegisterExternalEvent"))]
    async fn register_external_event(
        &self,
        request: Request<ExternalEventRequest>,
    ) -> Result<Response<ExternalEventResponse>, Status> {
        let req = request.into_inner();

        if req.code.is_empty() {
            return Err(Status::invalid_argument("code must not be empty"));
        }
        if req.token.is_empty() {
            return Err(Status::invalid_argument("token must not be empty"));
        }
        if req.event.is_empty() {
            return Err(Status::invalid_argument("event must not be empty"));
        }

        let payload = if req.payload.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&req.payload)
                .map_err(|e| Status::invalid_argument(format!("payload is not valid JSON: {e}")))?
        };

        let accepted = self
            .supervisor
            .register_external_event(&req.code, &req.token, &req.event, &payload)
            .await
            .map_err(|e| subbot_err_to_status(&e))?;

        Ok(Response::new(ExternalEventResponse { accepted }))
    }

    #[instrument(skip(self, request), fields(rpc = "Subscribe"))]
    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        let filter = if req.code.is_empty() {
            None
        } else {
            Some(req.code)
        };

        let mut rx = self.gateway.subscribe();

        // Convert broadcast::Receiver into a Stream via async_stream
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(code) = &filter
                            && &event.code != code
                        {
                            continue;
                        }
                        yield Ok(EventRecord {
                            id: 0,
                            code: event.code,
                            event: event.event,
                            payload: event.payload.to_string(),
                            created_at: Some(timestamp(event.at)),
                        });
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Subscriber lagged, skipped events");
                        // Continue receiving; the subscriber just missed some events
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(stream)))
    }

    #[instrument(skip(self, request), fields(rpc = "QueryEvents"))]
    async fn query_events(
        &self,
        request: Request<QueryEventsRequest>,
    ) -> Result<Response<QueryEventsResponse>, Status> {
        let req = request.into_inner();

        let code = if req.code.is_empty() {
            None
        } else {
            Some(req.code.as_str())
        };

        let rows = self
            .db
            .query_events(code, req.page, req.limit)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        Ok(Response::new(QueryEventsResponse {
            events: rows.into_iter().map(event_row_to_proto).collect(),
        }))
    }
}
