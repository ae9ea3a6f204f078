// Pricing engine
pub mod discounts;

// Checkout and order snapshots
pub mod commerce;

// External payment gateway
pub mod payments;
