pub mod balance;
pub mod instrument;
pub mod order;
pub mod trade;
pub mod user;

pub use balance::Balance;
pub use instrument::Instrument;
pub use order::{CreateOrderResponse, Direction, Order, OrderResponse, OrderStatus, PlaceOrderRequest};
pub use trade::{Trade, TransactionResponse};
pub use user::{RegisterRequest, User, UserResponse, UserRole};
