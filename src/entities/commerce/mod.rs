//! Entities owned by the storefront: customers, their addresses and carts.

pub mod cart;
pub mod cart_item;
pub mod customer;
pub mod customer_address;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use customer::Entity as Customer;
pub use customer_address::Entity as CustomerAddress;
