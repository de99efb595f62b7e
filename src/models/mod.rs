pub mod market;
pub mod order;
pub mod trade;
pub mod user;
pub mod wallet;

pub use market::*;
pub use order::*;
pub use trade::*;
pub use user::*;
pub use wallet::*;
