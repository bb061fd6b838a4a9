//! mailk-execution
//!
//! Everything between a MailRequest's desired state and the fulfillment
//! provider:
//!
//! - `payload`: Order Request Builder (`build` + `validate`)
//! - `order_state`: closed provider lifecycle vocabulary with a catch-all
//! - `FulfillmentGateway`: the single public path to create / fetch / cancel
//!
//! `order_router` is crate-private (never re-exported). External crates
//! implement `FulfillmentAdapter`, but only `FulfillmentGateway` can mint the
//! `GatewayInvokeToken` its methods require.

mod gateway;
mod order_router;
mod order_state;
pub mod payload;

pub use gateway::{CreateClaim, FulfillmentGateway};
pub use order_router::{
    FulfillmentAdapter, GatewayError, GatewayInvokeToken, GatewayResult, OrderRecord,
};
pub use order_state::OrderState;
pub use payload::{
    build, validate, FieldViolation, OrderPayload, PayloadAddress, ServiceCatalog,
    ValidationFailure,
};
