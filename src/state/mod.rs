pub mod funded_store;

pub use funded_store::FundedSubscriptionStore;
