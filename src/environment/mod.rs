//! Test environment: credentials/endpoints and script environment setup

mod factory;
mod helper;

pub use factory::{
    EnvironmentFactory, TestEnvironment, BASE_URI, CONNECTION_STRING_ENV, RAW_TOKEN,
    SUBSCRIPTION_ID, TENANT_ID, USER_ID,
};
pub use helper::EnvironmentSetupHelper;
