/// Connection bookkeeping
///
/// The registry owns every live client and its subscription set. The router
/// mutates subscriptions on request, and the lifecycle manager drives a
/// connection from accept to close.

pub mod lifecycle;
pub mod registry;
pub mod subscription_router;

pub use lifecycle::{ConnectionManager, ConnectionState, WELCOME_MESSAGE};
pub use registry::{
    ClientConnection, ConnectionId, ConnectionRegistry, Delivery, IdleConnection, OutboundFrame,
};
pub use subscription_router::SubscriptionRouter;
