//! Main sync server.

use crate::auth::{AuthConfig, Authenticator, Principal, RejectAll, TokenAuthenticator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::routes::Route;
use finsync_core::{
    Clock, Cursor, Loan, Record, RecordType, SyncStore, SystemClock, Timestamp, TombstoneLog,
    Transaction, UserId,
};
use finsync_sync_protocol::{
    ApiHandler, ApiRequest, ApiResponse, LoanBody, LoanList, NewLoan, NewTransaction,
    PayInstallment, SyncRequest, TransactionBody, TransactionList,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// The sync server.
///
/// Routes [`ApiRequest`]s to the Reconciler, the pull endpoints and the
/// direct record endpoints. It is transport-agnostic: an HTTP front end
/// only has to translate requests into [`ApiRequest`] and write back the
/// [`ApiResponse`].
///
/// # Example
///
/// ```
/// use finsync_core::{MemoryStore, UserId};
/// use finsync_sync_protocol::ApiRequest;
/// use finsync_sync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let config = ServerConfig::default().with_auth(b"my-secure-secret-32-bytes-long!".to_vec());
/// let server = SyncServer::new(config, Arc::new(MemoryStore::new()));
///
/// let token = server.issue_token(&UserId::new("u1")).unwrap();
/// let response = server.handle(ApiRequest::get("/api/loans").with_bearer(&token));
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    tokens: Option<TokenAuthenticator>,
}

impl SyncServer {
    /// Creates a server on the system clock.
    ///
    /// Requests are authenticated with HMAC tokens if the config carries a
    /// secret, and rejected otherwise.
    pub fn new(config: ServerConfig, store: Arc<dyn SyncStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock::new()))
    }

    /// Creates a server on the given clock.
    pub fn with_clock(config: ServerConfig, store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        let tokens = token_authenticator(&config, &clock);
        let authenticator: Arc<dyn Authenticator> = match &tokens {
            Some(tokens) => Arc::new(tokens.clone()),
            None => Arc::new(RejectAll),
        };
        Self::build(config, store, clock, authenticator, tokens)
    }

    /// Creates a server with a custom authenticator.
    pub fn with_authenticator(
        config: ServerConfig,
        store: Arc<dyn SyncStore>,
        clock: Arc<dyn Clock>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let tokens = token_authenticator(&config, &clock);
        Self::build(config, store, clock, authenticator, tokens)
    }

    fn build(
        config: ServerConfig,
        store: Arc<dyn SyncStore>,
        clock: Arc<dyn Clock>,
        authenticator: Arc<dyn Authenticator>,
        tokens: Option<TokenAuthenticator>,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(config, store, clock, authenticator));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            tokens,
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// The request handler, for calling operations without the envelope.
    #[must_use]
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Issues a bearer token for `user`, if the server has a token secret.
    #[must_use]
    pub fn issue_token(&self, user: &UserId) -> Option<String> {
        self.tokens.as_ref().map(|tokens| tokens.issue_token(user))
    }

    /// Handles one request.
    ///
    /// Unknown routes answer 404, then the caller is authenticated before
    /// the body is parsed or storage is touched.
    pub fn handle(&self, request: ApiRequest) -> ApiResponse {
        let Some(route) = Route::resolve(&request) else {
            tracing::debug!(method = ?request.method, path = %request.path, "no route");
            return ApiResponse::error(404, "Not found", Vec::new());
        };

        let result = self
            .handler
            .authenticate(&request)
            .and_then(|principal| self.dispatch(&route, &principal, &request));

        match result {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(route = route.name(), error = %err, "request failed");
                } else {
                    tracing::warn!(route = route.name(), error = %err, "request rejected");
                }
                err.to_response()
            }
        }
    }

    fn dispatch(
        &self,
        route: &Route,
        principal: &Principal,
        request: &ApiRequest,
    ) -> ServerResult<ApiResponse> {
        let handler = &self.handler;
        match route {
            Route::Sync => {
                let body: SyncRequest = request.parse_json()?;
                ok(&handler.handle_sync(principal, body)?)
            }
            Route::Pull(record_type) => {
                let cursor = match request.query_param("lastSync")? {
                    Some(raw) if !raw.trim().is_empty() => Cursor::parse(&raw)
                        .map_err(|e| ServerError::validation(format!("lastSync: {e}")))?,
                    _ => Timestamp::EPOCH,
                };
                match record_type {
                    RecordType::Transaction => {
                        ok(&handler.handle_pull::<Transaction>(principal, cursor)?)
                    }
                    RecordType::Loan => {
                        ok(&handler.handle_pull::<Loan>(principal, cursor)?)
                    }
                }
            }
            Route::List(record_type) => match record_type {
                RecordType::Transaction => ok(&TransactionList {
                    transactions: handler.list_transactions(principal)?,
                }),
                RecordType::Loan => ok(&LoanList {
                    loans: handler.list_loans(principal)?,
                }),
            },
            Route::CreateTransaction => {
                let body: NewTransaction = request.parse_json()?;
                let transaction = handler.create_transaction(principal, body)?;
                Ok(ApiResponse::json(201, &TransactionBody { transaction }))
            }
            Route::CreateLoan => {
                let body: NewLoan = request.parse_json()?;
                let loan = handler.create_loan(principal, body)?;
                Ok(ApiResponse::json(201, &LoanBody { loan }))
            }
            Route::Update(record_type, id) => {
                let body: serde_json::Value = request.parse_json()?;
                match handler.update_record(principal, *record_type, id.clone(), body)? {
                    Record::Transaction(transaction) => {
                        ok(&TransactionBody { transaction })
                    }
                    Record::Loan(loan) => ok(&LoanBody { loan }),
                }
            }
            Route::Delete(record_type, id) => ok(&handler.delete_record(principal, *record_type, id)?),
            Route::Pay(id) => {
                let body: PayInstallment = request.parse_json()?;
                ok(&LoanBody {
                    loan: handler.pay_installment(principal, id, body)?,
                })
            }
        }
    }

    /// Drops tombstones older than the configured retention.
    ///
    /// Returns how many were dropped; zero when tombstones are kept forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn prune_tombstones(&self) -> ServerResult<usize> {
        let now = self.context.clock.now();
        match self.context.config.tombstone_retention.horizon(now) {
            Some(horizon) => self.prune_tombstones_before(horizon),
            None => Ok(0),
        }
    }

    /// Drops tombstones with `deletedAt < horizon`.
    ///
    /// Clients whose cursor is older than `horizon` get a full resync from
    /// then on.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn prune_tombstones_before(&self, horizon: Timestamp) -> ServerResult<usize> {
        let dropped = self.context.store.prune_before(horizon)?;
        tracing::info!(horizon = %horizon, dropped, "tombstones pruned");
        Ok(dropped)
    }
}

impl ApiHandler for SyncServer {
    fn handle(&self, request: ApiRequest) -> ApiResponse {
        SyncServer::handle(self, request)
    }
}

fn ok<T: Serialize>(value: &T) -> ServerResult<ApiResponse> {
    Ok(ApiResponse::json(200, value))
}

fn token_authenticator(config: &ServerConfig, clock: &Arc<dyn Clock>) -> Option<TokenAuthenticator> {
    config.auth_secret.as_ref().map(|secret| {
        let auth = AuthConfig::new(secret.clone()).with_expiry(config.token_expiry);
        TokenAuthenticator::with_clock(auth, Arc::clone(clock))
    })
}

/// Prunes tombstones every `every` until the returned task is aborted.
///
/// Must be called from within a tokio runtime.
pub fn spawn_maintenance(server: Arc<SyncServer>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let server = Arc::clone(&server);
            match tokio::task::spawn_blocking(move || server.prune_tombstones()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "tombstone pruning failed"),
                Err(err) => tracing::error!(error = %err, "tombstone pruning task panicked"),
            }
        }
    })
}
