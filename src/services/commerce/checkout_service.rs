use futures::future;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::models::{CustomerProfile, NewOrder, OrderCreated, OrderItemSnapshot, ShippingAddress};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::errors::{CheckoutError, DiscountError};
use crate::events::{Event, EventSender};
use crate::repositories::{CheckoutLookup, CheckoutUnit, OrderRepository, OrderWriteError};
use crate::services::discounts::model::{CartSnapshot, DiscountResult};
use crate::services::discounts::DiscountService;
use crate::services::payments::{PaymentGatewayClient, PaymentGatewayError, PaymentIntentRequest};

/// Linear checkout state machine. Any failure aborts from the stage it was
/// raised in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStage {
    Validating,
    ComputingDiscounts,
    BuildingSnapshot,
    PersistingOrder,
    RequestingPaymentIntent,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    /// Falls back to the user's default address when absent.
    pub address_id: Option<Uuid>,
    pub payment_method_id: String,
    #[serde(default)]
    pub discount_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub payment_timeout: Duration,
    pub deadline: Option<Duration>,
    pub clamp_negative_totals: bool,
    pub default_currency: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(30),
            deadline: None,
            clamp_negative_totals: true,
            default_currency: "USD".to_string(),
        }
    }
}

impl CheckoutSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            payment_timeout: Duration::from_secs(config.payment.timeout_secs),
            deadline: config.checkout.deadline_secs.map(Duration::from_secs),
            clamp_negative_totals: config.checkout.clamp_negative_totals,
            default_currency: config.default_currency.clone(),
        }
    }
}

/// Deadline and cancellation signal for one checkout.
#[derive(Debug, Clone, Default)]
pub struct CheckoutContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels the checkout its context was handed to.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

impl CheckoutContext {
    /// No deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn cancellable() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(receiver),
            },
            CancelHandle { sender },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self
            .cancel
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        let expired = self.deadline.map_or(false, |at| Instant::now() >= at);
        signalled || expired
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let signal = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // handle dropped without cancelling
                        future::pending::<()>().await;
                    }
                },
                None => future::pending::<()>().await,
            }
        };
        let expiry = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = signal => {}
            _ = expiry => {}
        }
    }
}

/// Runs `work` unless the context is cancelled first.
async fn guarded<T, F>(
    ctx: &CheckoutContext,
    stage: CheckoutStage,
    work: F,
) -> Result<T, CheckoutError>
where
    F: Future<Output = Result<T, CheckoutError>>,
{
    if ctx.is_cancelled() {
        return Err(CheckoutError::Cancelled { stage });
    }
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(CheckoutError::Cancelled { stage }),
        outcome = work => outcome,
    }
}

fn write_error(err: OrderWriteError) -> CheckoutError {
    match err {
        OrderWriteError::UsageLimitReached { code, scope } => {
            CheckoutError::Discount(DiscountError::UsageLimitExceeded { code, scope })
        }
        OrderWriteError::Storage(err) => CheckoutError::Persistence(err.to_string()),
    }
}

struct CheckoutInputs {
    customer: CustomerProfile,
    cart: CartSnapshot,
    address: ShippingAddress,
}

/// Turns a cart into a persisted order plus a payment intent, all or nothing.
#[derive(Clone)]
pub struct CheckoutService {
    lookup: Arc<dyn CheckoutLookup>,
    discounts: DiscountService,
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGatewayClient>,
    clock: Arc<dyn Clock>,
    event_sender: Arc<EventSender>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        lookup: Arc<dyn CheckoutLookup>,
        discounts: DiscountService,
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGatewayClient>,
        clock: Arc<dyn Clock>,
        event_sender: Arc<EventSender>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            lookup,
            discounts,
            orders,
            gateway,
            clock,
            event_sender,
            settings,
        }
    }

    pub async fn checkout(&self, request: CheckoutRequest) -> Result<OrderCreated, CheckoutError> {
        self.checkout_with_context(request, CheckoutContext::background())
            .await
    }

    #[instrument(
        skip(self, request, ctx),
        fields(user_id = %request.user_id, cart_id = %request.cart_id)
    )]
    pub async fn checkout_with_context(
        &self,
        request: CheckoutRequest,
        ctx: CheckoutContext,
    ) -> Result<OrderCreated, CheckoutError> {
        let ctx = match self.settings.deadline {
            Some(deadline) => ctx.with_timeout(deadline),
            None => ctx,
        };

        let outcome = self.run(&request, &ctx).await;
        match &outcome {
            Ok(created) => {
                counter!("checkout.completed", 1);
                info!(
                    order_id = %created.order_id,
                    order_number = %created.order_number,
                    total = %created.total_price,
                    discount_total = %created.discount_total,
                    "Checkout completed"
                );
            }
            Err(err) => {
                counter!("checkout.aborted", 1, "kind" => err.kind());
                warn!(kind = err.kind(), "Checkout aborted: {}", err);
                self.publish(Event::CheckoutFailed {
                    cart_id: request.cart_id,
                    kind: err.kind().to_string(),
                });
            }
        }
        outcome
    }

    async fn run(
        &self,
        request: &CheckoutRequest,
        ctx: &CheckoutContext,
    ) -> Result<OrderCreated, CheckoutError> {
        let inputs = guarded(ctx, CheckoutStage::Validating, self.load_inputs(request)).await?;

        let user = inputs.customer.context();
        let discounts = guarded(ctx, CheckoutStage::ComputingDiscounts, async {
            self.discounts
                .process(&inputs.cart.items, &user, &request.discount_codes)
                .await
                .map_err(CheckoutError::from)
        })
        .await?;

        if ctx.is_cancelled() {
            return Err(CheckoutError::Cancelled {
                stage: CheckoutStage::BuildingSnapshot,
            });
        }
        let (order, items) = self.build_order(request, &inputs, &discounts)?;

        let mut unit = guarded(ctx, CheckoutStage::PersistingOrder, async {
            self.orders.begin().await.map_err(CheckoutError::from)
        })
        .await?;

        let written = guarded(ctx, CheckoutStage::PersistingOrder, async {
            unit.create_order_atomic(&order, &items, &discounts.applied_discount_ids)
                .await
                .map_err(write_error)
        })
        .await;
        if let Err(err) = written {
            abandon(unit, CheckoutStage::PersistingOrder).await;
            return Err(err);
        }

        let intent_request = PaymentIntentRequest {
            amount: order.total,
            currency: order.currency.clone(),
            email: inputs.customer.email.clone(),
            metadata: BTreeMap::from([
                ("order_id".to_string(), order.id.to_string()),
                ("order_number".to_string(), order.order_number.clone()),
                ("user_id".to_string(), order.user_id.to_string()),
                (
                    "payment_method_id".to_string(),
                    request.payment_method_id.clone(),
                ),
            ]),
            idempotency_key: Some(order.id.to_string()),
        };
        let requested = guarded(
            ctx,
            CheckoutStage::RequestingPaymentIntent,
            self.request_payment_intent(intent_request),
        )
        .await;
        let intent = match requested {
            Ok(intent) => intent,
            Err(err) => {
                abandon(unit, CheckoutStage::RequestingPaymentIntent).await;
                return Err(err);
            }
        };

        let attached = unit.attach_payment_intent(order.id, &intent).await;
        let failure = match attached {
            Err(err) => Some(CheckoutError::from(err)),
            Ok(()) if ctx.is_cancelled() => Some(CheckoutError::Cancelled {
                stage: CheckoutStage::RequestingPaymentIntent,
            }),
            Ok(()) => None,
        };
        if let Some(err) = failure {
            abandon(unit, CheckoutStage::RequestingPaymentIntent).await;
            self.cancel_intent(&intent.id).await;
            return Err(err);
        }

        if let Err(err) = unit.commit().await {
            error!(order_id = %order.id, "Order commit failed: {}", err);
            self.cancel_intent(&intent.id).await;
            return Err(CheckoutError::Persistence(err.to_string()));
        }

        self.publish(Event::OrderCreated {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            total: order.total,
            currency: order.currency.clone(),
        });
        if !discounts.is_empty() {
            self.publish(Event::DiscountsApplied {
                order_id: order.id,
                discount_ids: discounts.applied_discount_ids.clone(),
                discount_total: order.discount_total,
            });
        }
        self.publish(Event::CheckoutCompleted {
            cart_id: order.cart_id,
            order_id: order.id,
            payment_intent_id: intent.id.clone(),
        });

        Ok(OrderCreated {
            order_id: order.id,
            order_number: order.order_number,
            total_price: order.total,
            discount_total: order.discount_total,
            currency: order.currency,
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            applied_discount_ids: discounts.applied_discount_ids,
        })
    }

    async fn load_inputs(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutInputs, CheckoutError> {
        let customer = self
            .lookup
            .find_customer(request.user_id)
            .await?
            .ok_or(CheckoutError::UserNotFound(request.user_id))?;

        let cart = self
            .lookup
            .find_cart(request.cart_id)
            .await?
            .ok_or(CheckoutError::CartNotFound(request.cart_id))?;
        if cart.user_id != Some(request.user_id) {
            return Err(CheckoutError::Forbidden(format!(
                "cart {} does not belong to user {}",
                cart.id, request.user_id
            )));
        }
        if cart.items.is_empty() {
            return Err(CheckoutError::EmptyCart(cart.id));
        }

        let address = match request.address_id {
            Some(address_id) => self
                .lookup
                .find_address(address_id)
                .await?
                .ok_or(CheckoutError::AddressNotFound(Some(address_id)))?,
            None => self
                .lookup
                .find_default_address(request.user_id)
                .await?
                .ok_or(CheckoutError::AddressNotFound(None))?,
        };
        if address.user_id != request.user_id {
            return Err(CheckoutError::Forbidden(format!(
                "address {} does not belong to user {}",
                address.id, request.user_id
            )));
        }

        Ok(CheckoutInputs {
            customer,
            cart,
            address,
        })
    }

    fn build_order(
        &self,
        request: &CheckoutRequest,
        inputs: &CheckoutInputs,
        discounts: &DiscountResult,
    ) -> Result<(NewOrder, Vec<OrderItemSnapshot>), CheckoutError> {
        let items: Vec<OrderItemSnapshot> = inputs
            .cart
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                OrderItemSnapshot::capture(item, discounts.discount_for_item(index))
            })
            .collect();

        let subtotal: Decimal = items.iter().map(|i| i.line_total).sum();
        let discount_total = discounts.total_discount;
        let mut total = subtotal - discount_total;
        if total < Decimal::ZERO {
            if !self.settings.clamp_negative_totals {
                return Err(CheckoutError::NegativeTotal(total));
            }
            warn!(
                cart_id = %inputs.cart.id,
                %subtotal,
                %discount_total,
                "Discounts exceed the cart subtotal, clamping total to zero"
            );
            total = Decimal::ZERO;
        }

        let currency = if inputs.cart.currency.trim().is_empty() {
            self.settings.default_currency.clone()
        } else {
            inputs.cart.currency.to_uppercase()
        };

        let id = Uuid::new_v4();
        let order = NewOrder {
            id,
            order_number: NewOrder::order_number_for(id),
            user_id: request.user_id,
            cart_id: inputs.cart.id,
            shipping_address_id: inputs.address.id,
            payment_method_id: request.payment_method_id.clone(),
            currency,
            subtotal,
            discount_total,
            total,
            free_shipping: discounts.free_shipping,
            created_at: self.clock.now(),
        };
        Ok((order, items))
    }

    async fn request_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<crate::services::payments::PaymentIntent, CheckoutError> {
        match tokio::time::timeout(
            self.settings.payment_timeout,
            self.gateway.create_payment_intent(request),
        )
        .await
        {
            Ok(Ok(intent)) => Ok(intent),
            Ok(Err(err)) => Err(CheckoutError::PaymentGateway(err.to_string())),
            Err(_) => Err(CheckoutError::PaymentGateway(
                PaymentGatewayError::Timeout.to_string(),
            )),
        }
    }

    /// Best-effort compensation for an intent whose order never committed.
    async fn cancel_intent(&self, intent_id: &str) {
        let cancelled = tokio::time::timeout(
            self.settings.payment_timeout,
            self.gateway.cancel_payment_intent(intent_id.to_string()),
        )
        .await;
        match cancelled {
            Ok(Ok(())) => info!(intent_id, "Cancelled payment intent of abandoned order"),
            Ok(Err(err)) => error!(intent_id, "Failed to cancel payment intent: {}", err),
            Err(_) => error!(intent_id, "Timed out cancelling payment intent"),
        }
    }

    fn publish(&self, event: Event) {
        if let Err(err) = self.event_sender.try_send(event) {
            warn!("Dropping checkout event: {}", err);
        }
    }
}

async fn abandon(unit: Box<dyn CheckoutUnit>, stage: CheckoutStage) {
    warn!(%stage, "Rolling back checkout unit");
    if let Err(err) = unit.rollback().await {
        error!(%stage, "Rollback failed: {}", err);
    }
}
