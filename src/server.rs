//! gRPC server for the provider protocol.
//!
//! [`ProviderService`] is the provider-facing API; the private
//! `ProviderGrpcService` adapts it to the generated `hemmer.provider.v1`
//! service. Provider errors never become gRPC statuses: each one is returned
//! inside the response as an error diagnostic.
//!
//! [`serve`] prints the handshake line, serves until SIGTERM or SIGINT, lets
//! in-flight calls drain and finally stops the provider.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// The provider protocol in terms of JSON records and crate types.
///
/// Implemented by [`crate::ClickHouseProvider`]. Records arrive and leave as
/// `serde_json::Value`; the gRPC layer handles byte encoding. Diagnostics
/// returned in `Ok` are user-facing findings, while `Err` means the call
/// failed outright. Both reach the engine as diagnostics.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Provider block, resource and data source schemas.
    fn schema(&self) -> ProviderSchema;

    /// Type names and capabilities, answered without building schemas.
    fn metadata(&self) -> ProviderMetadata;

    /// Check the provider block's types. Values may still be missing since
    /// they can come from the environment.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Resolve connection parameters and connect.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release the connection opened by `configure`.
    async fn stop(&self) -> Result<(), ProviderError>;

    /// Check a resource block against its schema.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Diff `prior_state` against `proposed_state`. A `None` prior state
    /// plans a create and a null proposed state plans a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the object described by `planned_state`.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh `current_state` from the server.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Apply an in-place change.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Drop the object described by `current_state`.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Build state for an object that already exists on the server.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError>;

    /// Check a data source block against its schema.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// List the catalog behind `data_source_type`.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError>;
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

/// Decode a JSON record sent by the engine. Empty or malformed bytes decode
/// to `null`, which the provider then rejects with a diagnostic.
fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<pb::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| {
            let severity = match d.severity {
                DiagnosticSeverity::Error => pb::diagnostic::Severity::Error,
                DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning,
            };
            pb::Diagnostic {
                severity: severity as i32,
                summary: d.summary,
                detail: d.detail.unwrap_or_default(),
                attribute: d.attribute.unwrap_or_default(),
            }
        })
        .collect()
}

fn error_to_proto(err: &ProviderError) -> Vec<pb::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

/// Fold the outcome of a validation-style call into response diagnostics.
fn report(
    operation: &str,
    subject: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<pb::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            if has_errors(&diagnostics) {
                warn!(operation, subject, diagnostics = diagnostics.len(), "Completed with errors");
            } else {
                debug!(operation, subject, "Completed");
            }
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(operation, subject, error = %e, "Failed");
            error_to_proto(&e)
        },
    }
}

/// Encoded state and diagnostics for a call that returns a record. A failed
/// call returns empty state bytes.
fn record(
    operation: &str,
    subject: &str,
    result: Result<Value, ProviderError>,
) -> (Vec<u8>, Vec<pb::Diagnostic>) {
    match result {
        Ok(state) => {
            info!(operation, subject, "Completed");
            (encode(&state), Vec::new())
        },
        Err(e) => {
            error!(operation, subject, error = %e, "Failed");
            (Vec::new(), error_to_proto(&e))
        },
    }
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    let attributes = schema
        .block
        .attributes
        .iter()
        .map(|(name, attr)| pb::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
        })
        .collect();

    pb::Schema {
        version: schema.version as i64,
        block: Some(pb::Block {
            attributes,
            description: schema.block.description.clone().unwrap_or_default(),
        }),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<pb::GetMetadataRequest>,
    ) -> Result<Response<pb::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata"
        );

        Ok(Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: Vec::new(),
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<pb::GetSchemaRequest>,
    ) -> Result<Response<pb::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema"
        );

        Ok(Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(name, s)| (name.clone(), schema_to_proto(s)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(name, s)| (name.clone(), schema_to_proto(s)))
                .collect(),
            diagnostics: Vec::new(),
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<pb::ValidateProviderConfigRequest>,
    ) -> Result<Response<pb::ValidateProviderConfigResponse>, Status> {
        let req = request.into_inner();
        let result = self.provider.validate_provider_config(decode(&req.config)).await;

        Ok(Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: report("ValidateProviderConfig", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<pb::ConfigureRequest>,
    ) -> Result<Response<pb::ConfigureResponse>, Status> {
        let req = request.into_inner();
        let result = self.provider.configure(decode(&req.config)).await;

        Ok(Response::new(pb::ConfigureResponse {
            diagnostics: report("Configure", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<pb::StopRequest>,
    ) -> Result<Response<pb::StopResponse>, Status> {
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(pb::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: Request<pb::ValidateResourceConfigRequest>,
    ) -> Result<Response<pb::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .validate_resource_config(&req.resource_type, decode(&req.config))
            .await;

        Ok(Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: report("ValidateResourceConfig", &req.resource_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.plan")]
    async fn plan(
        &self,
        request: Request<pb::PlanRequest>,
    ) -> Result<Response<pb::PlanResponse>, Status> {
        let req = request.into_inner();
        // Empty prior state means the resource does not exist yet.
        let prior_state = serde_json::from_slice(&req.prior_state).ok();

        let result = self
            .provider
            .plan(
                &req.resource_type,
                prior_state,
                decode(&req.proposed_state),
                decode(&req.config),
            )
            .await;

        let response = match result {
            Ok(plan) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Planned"
                );
                pb::PlanResponse {
                    planned_state: encode(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: Vec::new(),
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                pb::PlanResponse {
                    planned_state: Vec::new(),
                    changes: Vec::new(),
                    requires_replace: false,
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create")]
    async fn create(
        &self,
        request: Request<pb::CreateRequest>,
    ) -> Result<Response<pb::CreateResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .create(&req.resource_type, decode(&req.planned_state))
            .await;

        let (state, diagnostics) = record("Create", &req.resource_type, result);
        Ok(Response::new(pb::CreateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read")]
    async fn read(
        &self,
        request: Request<pb::ReadRequest>,
    ) -> Result<Response<pb::ReadResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .read(&req.resource_type, decode(&req.current_state))
            .await;

        let (state, diagnostics) = record("Read", &req.resource_type, result);
        Ok(Response::new(pb::ReadResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.update")]
    async fn update(
        &self,
        request: Request<pb::UpdateRequest>,
    ) -> Result<Response<pb::UpdateResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .update(
                &req.resource_type,
                decode(&req.prior_state),
                decode(&req.planned_state),
            )
            .await;

        let (state, diagnostics) = record("Update", &req.resource_type, result);
        Ok(Response::new(pb::UpdateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.delete")]
    async fn delete(
        &self,
        request: Request<pb::DeleteRequest>,
    ) -> Result<Response<pb::DeleteResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .delete(&req.resource_type, decode(&req.current_state))
            .await
            .map(|()| Vec::new());

        Ok(Response::new(pb::DeleteResponse {
            diagnostics: report("Delete", &req.resource_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: Request<pb::ImportResourceStateRequest>,
    ) -> Result<Response<pb::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();

        let response = match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => {
                info!(resource_type = %req.resource_type, id = %req.id, "Imported");
                pb::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| pb::ImportedResource {
                            state: encode(&r.state),
                            resource_type: r.resource_type,
                        })
                        .collect(),
                    diagnostics: Vec::new(),
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, id = %req.id, error = %e, "Import failed");
                pb::ImportResourceStateResponse {
                    imported: Vec::new(),
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: Request<pb::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<pb::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .validate_data_source_config(&req.data_source_type, decode(&req.config))
            .await;

        Ok(Response::new(pb::ValidateDataSourceConfigResponse {
            diagnostics: report("ValidateDataSourceConfig", &req.data_source_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: Request<pb::ReadDataSourceRequest>,
    ) -> Result<Response<pb::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .provider
            .read_data_source(&req.data_source_type, decode(&req.config))
            .await;

        let (state, diagnostics) = record("ReadDataSource", &req.data_source_type, result);
        Ok(Response::new(pb::ReadDataSourceResponse { state, diagnostics }))
    }
}

/// How [`serve_with_options`] listens and shuts down.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to bind. Port 0 picks a free port, which is what the engine
    /// expects since it reads the address from the handshake.
    pub address: SocketAddr,
    /// How long in-flight requests may take to finish once a shutdown
    /// signal arrives.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Loopback on a free port with a 30 second drain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `address` instead of a free loopback port.
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Bound the drain after a shutdown signal.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal.
///
/// On Unix this is SIGTERM or SIGINT, elsewhere CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            },
            Err(e) => {
                warn!(error = %e, "Unable to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            },
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
            Err(e) => {
                warn!(error = %e, "Unable to install CTRL+C handler");
                std::future::pending::<()>().await;
            },
        }
    }
}

/// Serve `provider` on a free loopback port until SIGTERM or SIGINT.
///
/// Prints `HEMMER_PROVIDER|<version>|<address>` on stdout once the port is
/// bound, then answers gRPC calls from the engine.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// [`serve`] with an explicit address and shutdown timeout.
///
/// After a shutdown signal the server stops accepting connections, lets
/// in-flight calls finish within [`ServeOptions::shutdown_timeout`] and then
/// calls [`ProviderService::stop`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(options.address).await?;
    let addr = listener.local_addr()?;

    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Listening for the engine");

    let provider = Arc::new(provider);
    let service = pb::provider_server::ProviderServer::new(ProviderGrpcService {
        provider: Arc::clone(&provider),
    });

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server_future = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                wait_for_shutdown_signal().await;
                let _ = signalled_tx.send(());
            },
        );
    tokio::pin!(server_future);

    // Only the drain after a signal is bounded by the shutdown timeout.
    let outcome = tokio::select! {
        result = &mut server_future => Some(result),
        _ = signalled_rx => {
            tokio::time::timeout(options.shutdown_timeout, &mut server_future)
                .await
                .ok()
        }
    };

    match outcome {
        Some(Ok(())) => debug!("gRPC server drained"),
        Some(Err(e)) => {
            error!(error = %e, "gRPC server failed");
            return Err(e.into());
        },
        None => warn!(
            timeout = ?options.shutdown_timeout,
            "In-flight calls did not finish in time"
        ),
    }

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop failed during shutdown");
    }

    info!("Provider shut down");
    Ok(())
}
