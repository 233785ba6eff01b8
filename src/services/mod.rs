pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod products;
pub mod references;
