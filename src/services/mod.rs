pub mod cart;
pub mod checkout;
pub mod orders;
pub mod pricing;

// Re-export services for convenience
pub use cart::{AddItemInput, CartService, CartView, GuestCartItem, MergeOutcome};
pub use checkout::{CheckoutOutcome, CheckoutService};
pub use orders::{OrderService, OrderWithItems};
