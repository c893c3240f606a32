use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use ordersync_core::domain::order::OrderId;
use ordersync_core::errors::{ApplicationError, InterfaceError};
use ordersync_sync::{
    AmendmentEvent, B2bOrder, DealOutcome, PushOutcome, SyncError, WebhookOutcome,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bootstrap::Services;

pub const WEBHOOK_SECRET_HEADER: &str = "x-ordersync-webhook-secret";

#[derive(Clone)]
pub struct ApiState {
    services: Arc<Services>,
    webhook_secret: Option<String>,
    shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(
        services: Arc<Services>,
        webhook_secret: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { services, webhook_secret, shutdown }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/webhooks/crm/orders", post(receive_amendment))
        .route("/api/v1/orders/{order_id}/push", post(push_order))
        .route("/api/v1/b2b/deals", post(create_deal))
        .with_state(state)
}

pub async fn receive_amendment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(event): Json<AmendmentEvent>,
) -> ApiResult<WebhookOutcome> {
    webhook_secret_guard(&headers, state.webhook_secret.as_deref())?;

    let external_id = event.external_id.clone();
    let outcome = state
        .services
        .webhook
        .handle(event)
        .await
        .map_err(|error| sync_error_response("webhook.amendment", error))?;

    info!(
        event_name = "api.webhook.handled",
        external_id = %external_id,
        outcome = ?outcome,
        "crm amendment handled"
    );
    Ok((StatusCode::OK, Json(outcome)))
}

pub async fn push_order(
    State(state): State<ApiState>,
    Path(order_id): Path<i64>,
) -> ApiResult<PushOutcome> {
    let Some(push) = state.services.push.as_ref() else {
        return Err(disabled("order push"));
    };

    let outcome = push
        .push_order_by_id(OrderId(order_id), &state.shutdown)
        .await
        .map_err(|error| sync_error_response("orders.push", error))?;
    Ok((StatusCode::OK, Json(outcome)))
}

pub async fn create_deal(
    State(state): State<ApiState>,
    Json(order): Json<B2bOrder>,
) -> ApiResult<DealOutcome> {
    let Some(deals) = state.services.deals.as_ref() else {
        return Err(disabled("b2b deals"));
    };

    let outcome = deals
        .push_deal(order, &state.shutdown)
        .await
        .map_err(|error| sync_error_response("b2b.deal", error))?;
    let status = match outcome {
        DealOutcome::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

fn webhook_secret_guard(
    headers: &HeaderMap,
    expected: Option<&str>,
) -> Result<(), (StatusCode, Json<ApiError>)> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers.get(WEBHOOK_SECRET_HEADER).and_then(|value| value.to_str().ok());
    let message = match provided {
        Some(value) if value == expected => return Ok(()),
        Some(_) => "invalid webhook secret",
        None => "missing webhook secret",
    };
    Err((
        StatusCode::UNAUTHORIZED,
        Json(ApiError { error: message.to_string(), correlation_id: new_correlation_id() }),
    ))
}

fn disabled(feature: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError {
            error: format!("{feature} is unavailable while the crm integration is disabled"),
            correlation_id: new_correlation_id(),
        }),
    )
}

fn sync_error_response(operation: &'static str, error: SyncError) -> (StatusCode, Json<ApiError>) {
    let kind = error.kind();
    let interface = ApplicationError::from(error).into_interface(new_correlation_id());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            operation,
            error_kind = kind,
            correlation_id = %interface.correlation_id(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            operation,
            error_kind = kind,
            correlation_id = %interface.correlation_id(),
            error = %interface,
            "request rejected"
        );
    }

    let message = match &interface {
        InterfaceError::BadRequest { .. } | InterfaceError::NotFound { .. } => interface.to_string(),
        _ => interface.user_message().to_string(),
    };
    (
        status,
        Json(ApiError { error: message, correlation_id: interface.correlation_id().to_string() }),
    )
}

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        Json,
    };
    use chrono::Utc;
    use ordersync_core::domain::client::ClientDetails;
    use ordersync_core::domain::order::{CheckoutOrder, LineItem, OrderId, OrderTotals};
    use ordersync_core::domain::status::OrderStatus;
    use ordersync_db::repositories::{
        InMemoryOrderRepository, InMemoryProductRepository, InMemorySnapshotRepository,
        OrderRepository,
    };
    use ordersync_sync::crm::{
        ContactPayload, CrmClient, CrmError, CrmLineItem, DealPayload, RecordKind,
        SalesOrderPayload,
    };
    use ordersync_sync::{
        AmendmentEvent, B2bDealBuilder, B2bOrder, OrderPushService, PushOutcome, PushSettings,
        WebhookHandler, WebhookOutcome, WebhookSettings,
    };
    use rust_decimal::Decimal;
    use tokio_util::sync::CancellationToken;

    use super::{create_deal, push_order, receive_amendment, ApiState, WEBHOOK_SECRET_HEADER};
    use crate::bootstrap::Services;

    struct StubCrm;

    #[async_trait]
    impl CrmClient for StubCrm {
        async fn create_contact(&self, _contact: &ContactPayload) -> Result<String, CrmError> {
            Ok("contact-1".to_string())
        }

        async fn update_contact(&self, _id: &str, _contact: &ContactPayload) -> Result<(), CrmError> {
            Ok(())
        }

        async fn create_sales_order(&self, _order: &SalesOrderPayload) -> Result<String, CrmError> {
            Ok("so-1".to_string())
        }

        async fn create_deal(&self, _deal: &DealPayload) -> Result<String, CrmError> {
            Ok("deal-1".to_string())
        }

        async fn append_line_items(
            &self,
            _kind: RecordKind,
            _record_id: &str,
            _items: &[CrmLineItem],
        ) -> Result<(), CrmError> {
            Ok(())
        }
    }

    fn client() -> ClientDetails {
        ClientDetails {
            name: "Anna Nowak".to_string(),
            email: "anna@example.com".to_string(),
            country: "Polska".to_string(),
            postal_code: "30-001".to_string(),
            ..ClientDetails::default()
        }
    }

    fn line() -> LineItem {
        LineItem {
            id: 1,
            uid: "uid-1".to_string(),
            external_product_id: "crm-1".to_string(),
            name: "Kettle".to_string(),
            quantity: 2,
            price: Decimal::new(5_000, 2),
            total: Decimal::new(10_000, 2),
            ..LineItem::default()
        }
    }

    fn stored_order(id: i64) -> CheckoutOrder {
        CheckoutOrder {
            id: OrderId(id),
            client_ref: format!("client-{id}"),
            items: vec![line()],
            client: Some(client()),
            totals: OrderTotals {
                total: Decimal::new(12_300, 2),
                sub_total: Decimal::new(10_000, 2),
                tax_value: Decimal::new(2_300, 2),
                ..OrderTotals::default()
            },
            currency: "PLN".to_string(),
            status: OrderStatus::New,
            created_at: Utc::now(),
            external_id: None,
            deal_id: None,
            tracking_reference: None,
            source: "shop".to_string(),
            comment: String::new(),
            sync_note: None,
        }
    }

    fn webhook(orders: Arc<InMemoryOrderRepository>) -> Arc<WebhookHandler> {
        Arc::new(WebhookHandler::new(
            orders,
            Arc::new(InMemorySnapshotRepository::default()),
            WebhookSettings {
                shipping_product_id: "shipping".to_string(),
                lookup_attempts: 1,
                lookup_delay: Duration::ZERO,
            },
        ))
    }

    fn state(orders: Arc<InMemoryOrderRepository>, crm_enabled: bool, secret: Option<&str>) -> ApiState {
        let (push, deals) = if crm_enabled {
            let products = Arc::new(InMemoryProductRepository::default());
            let push = OrderPushService::new(
                Arc::new(StubCrm),
                orders.clone(),
                products.clone(),
                PushSettings {
                    shipping_product_id: "shipping".to_string(),
                    batch_limit: 100,
                    discovery_batch_size: 10,
                    interval: Duration::from_secs(60),
                },
            );
            let deals = B2bDealBuilder::new(Arc::new(StubCrm), orders.clone(), products, 100);
            (Some(Arc::new(push)), Some(Arc::new(deals)))
        } else {
            (None, None)
        };
        let services = Services { push, deals, webhook: webhook(orders) };
        ApiState::new(Arc::new(services), secret.map(str::to_string), CancellationToken::new())
    }

    fn echo_event(external_id: &str) -> AmendmentEvent {
        AmendmentEvent {
            external_id: external_id.to_string(),
            items: Vec::new(),
            currency: None,
            grand_total: Decimal::new(12_300, 2),
            status: None,
        }
    }

    #[tokio::test]
    async fn webhook_requires_the_configured_secret() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        let state = state(orders, false, Some("s3cret"));

        let missing = receive_amendment(State(state.clone()), HeaderMap::new(), Json(echo_event("so-1")))
            .await
            .expect_err("missing secret");
        assert_eq!(missing.0, StatusCode::UNAUTHORIZED);
        assert_eq!(missing.1.error, "missing webhook secret");

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("wrong"));
        let invalid = receive_amendment(State(state), headers, Json(echo_event("so-1")))
            .await
            .expect_err("invalid secret");
        assert_eq!(invalid.0, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.1.error, "invalid webhook secret");
    }

    #[tokio::test]
    async fn webhook_echo_of_our_own_push_only_clears_the_marker() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        let mut order = stored_order(7);
        order.external_id = Some("so-7".to_string());
        order.tracking_reference = Some("push-abc".to_string());
        orders.save(order).await.expect("save");

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        let (status, Json(outcome)) = receive_amendment(
            State(state(orders.clone(), false, Some("s3cret"))),
            headers,
            Json(echo_event("so-7")),
        )
        .await
        .expect("echo handled");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, WebhookOutcome::EchoCleared { order_id: OrderId(7) });
        let stored = orders.find_by_id(OrderId(7)).await.expect("find").expect("order");
        assert_eq!(stored.tracking_reference, None);
        assert_eq!(stored.totals.total, Decimal::new(12_300, 2));
    }

    #[tokio::test]
    async fn webhook_for_an_unknown_external_id_is_not_found() {
        let orders = Arc::new(InMemoryOrderRepository::default());

        let (status, Json(error)) =
            receive_amendment(State(state(orders, false, None)), HeaderMap::new(), Json(echo_event("so-404")))
                .await
                .expect_err("unknown external id");

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(error.correlation_id.starts_with("req-"));
    }

    #[tokio::test]
    async fn push_is_unavailable_while_crm_is_disabled() {
        let orders = Arc::new(InMemoryOrderRepository::default());

        let (status, Json(error)) = push_order(State(state(orders, false, None)), Path(1))
            .await
            .expect_err("disabled");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(error.error.contains("crm integration is disabled"));
    }

    #[tokio::test]
    async fn push_syncs_a_stored_order_and_reports_unknown_ids() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(stored_order(3)).await.expect("save");
        let state = state(orders.clone(), true, None);

        let (status, Json(outcome)) =
            push_order(State(state.clone()), Path(3)).await.expect("push succeeds");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, PushOutcome::Synced { external_id: "so-1".to_string() });
        let stored = orders.find_by_id(OrderId(3)).await.expect("find").expect("order");
        assert_eq!(stored.external_id.as_deref(), Some("so-1"));

        let (status, _) = push_order(State(state), Path(99)).await.expect_err("unknown order");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deal_with_unsupported_currency_is_a_bad_request() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(stored_order(5)).await.expect("save");

        let order = B2bOrder {
            order_id: OrderId(5),
            client: client(),
            items: vec![line()],
            currency: "CHF".to_string(),
            subtotal: Decimal::new(10_000, 2),
            total_vat: Decimal::new(2_300, 2),
            total: Decimal::new(12_300, 2),
            discount_percent: Decimal::ZERO,
        };
        let (status, Json(error)) = create_deal(State(state(orders, true, None)), Json(order))
            .await
            .expect_err("unsupported currency");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.error.contains("CHF"));
    }

    #[tokio::test]
    async fn deal_creation_returns_created() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(stored_order(6)).await.expect("save");

        let order: B2bOrder = serde_json::from_value(serde_json::json!({
            "order_id": 6,
            "client": {
                "name": "Hurtownia Sp. z o.o.",
                "email": "biuro@example.com",
                "phone": "",
                "country": "Polska",
                "postal_code": "00-001",
                "city": "Warszawa",
                "street": "Prosta 1",
                "tax_id": "5250000000",
                "group_id": 2
            },
            "items": [{
                "id": 1, "uid": "uid-1", "external_product_id": "crm-1", "name": "Kettle",
                "quantity": 2, "price": "50.00", "tax": "0", "total": "100.00",
                "discount_percent": "0", "net_total": "0", "is_shipping": false
            }],
            "currency": "EUR",
            "subtotal": "100.00",
            "total_vat": "23.00",
            "total": "123.00"
        }))
        .expect("decode b2b order");

        let (status, Json(outcome)) =
            create_deal(State(state(orders, true, None)), Json(order)).await.expect("deal created");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            serde_json::to_value(&outcome).expect("encode")["deal_id"],
            serde_json::json!("deal-1")
        );
    }
}
