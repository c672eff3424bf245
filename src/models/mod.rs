pub mod bundle;
pub mod identity;
pub mod result;

pub use bundle::{CredentialBundle, IssuedToken, Tier, TokenMap};
pub use identity::AccountIdentity;
pub use result::{AccountResult, BatchResult, TierEvent};
