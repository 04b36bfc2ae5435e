//! Aggregates owned by the identity service.

mod account;

pub use account::{
    AccountAction, AccountEnvironment, AccountReducer, AccountRejection, AccountState, validate_password,
};
