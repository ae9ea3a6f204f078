/// Commerce services module - checkout orchestration and order snapshots
pub mod checkout_service;
pub mod models;

// Re-export services for convenience
pub use checkout_service::{
    CancelHandle, CheckoutContext, CheckoutRequest, CheckoutService, CheckoutSettings,
    CheckoutStage,
};
pub use models::{CustomerProfile, OrderCreated, OrderItemSnapshot, ShippingAddress};
