pub mod aave;

pub use aave::{AavePositions, reserve_rate_to_apy};
