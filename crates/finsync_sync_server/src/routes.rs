//! Request routing.

use finsync_core::{RecordId, RecordType};
use finsync_sync_protocol::{ApiRequest, Method};

/// An endpoint, resolved from method and path alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `POST /api/sync`
    Sync,
    /// `GET /api/{type}/sync?lastSync=`
    Pull(RecordType),
    /// `GET /api/{type}`
    List(RecordType),
    /// `POST /api/transactions`
    CreateTransaction,
    /// `POST /api/loans`
    CreateLoan,
    /// `PUT /api/{type}` or `PUT /api/{type}/{id}`
    Update(RecordType, Option<RecordId>),
    /// `DELETE /api/{type}/{id}`
    Delete(RecordType, RecordId),
    /// `POST /api/loans/{id}/pay`
    Pay(RecordId),
}

impl Route {
    /// Resolves the route of `request`, or `None` if no endpoint matches.
    #[must_use]
    pub fn resolve(request: &ApiRequest) -> Option<Self> {
        let segments = request.segments();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let ["api", rest @ ..] = segments.as_slice() else {
            return None;
        };

        match (request.method, rest) {
            (Method::Post, ["sync"]) => Some(Self::Sync),
            (Method::Get, [collection, "sync"]) => {
                RecordType::from_collection(collection).map(Self::Pull)
            }
            (Method::Get, [collection]) => RecordType::from_collection(collection).map(Self::List),
            (Method::Post, ["transactions"]) => Some(Self::CreateTransaction),
            (Method::Post, ["loans"]) => Some(Self::CreateLoan),
            (Method::Put, [collection]) => {
                RecordType::from_collection(collection).map(|t| Self::Update(t, None))
            }
            (Method::Put, [collection, id]) => RecordType::from_collection(collection)
                .map(|t| Self::Update(t, Some(RecordId::new(*id)))),
            (Method::Delete, [collection, id]) => RecordType::from_collection(collection)
                .map(|t| Self::Delete(t, RecordId::new(*id))),
            (Method::Post, ["loans", id, "pay"]) => Some(Self::Pay(RecordId::new(*id))),
            _ => None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Pull(_) => "pull",
            Self::List(_) => "list",
            Self::CreateTransaction => "create_transaction",
            Self::CreateLoan => "create_loan",
            Self::Update(..) => "update",
            Self::Delete(..) => "delete",
            Self::Pay(_) => "pay",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::Timestamp;
    use finsync_sync_protocol::paths;

    fn route(method: Method, path: &str) -> Option<Route> {
        Route::resolve(&ApiRequest::new(method, path))
    }

    #[test]
    fn sync_and_pull() {
        assert_eq!(route(Method::Post, paths::SYNC), Some(Route::Sync));
        assert_eq!(
            Route::resolve(&ApiRequest::pull(RecordType::Loan, Timestamp::EPOCH)),
            Some(Route::Pull(RecordType::Loan))
        );
        assert_eq!(route(Method::Get, paths::SYNC), None);
    }

    #[test]
    fn record_endpoints() {
        assert_eq!(
            route(Method::Get, "/api/transactions"),
            Some(Route::List(RecordType::Transaction))
        );
        assert_eq!(route(Method::Post, "/api/loans"), Some(Route::CreateLoan));
        assert_eq!(
            route(Method::Put, "/api/loans"),
            Some(Route::Update(RecordType::Loan, None))
        );
        assert_eq!(
            route(Method::Delete, &paths::record(RecordType::Transaction, &RecordId::new("a b"))),
            Some(Route::Delete(RecordType::Transaction, RecordId::new("a b")))
        );
        assert_eq!(
            route(Method::Post, &paths::pay(&RecordId::new("l1"))),
            Some(Route::Pay(RecordId::new("l1")))
        );
    }

    #[test]
    fn unknown_paths() {
        assert_eq!(route(Method::Get, "/api/budgets"), None);
        assert_eq!(route(Method::Get, "/health"), None);
        assert_eq!(route(Method::Delete, "/api/loans"), None);
        assert_eq!(route(Method::Post, "/api/transactions/t1/pay"), None);
    }
}
