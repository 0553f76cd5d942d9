//! Implementaciones de `PolicyProvider`.

mod mock_provider;

pub use mock_provider::{MockPolicy, MockPolicyProvider};
