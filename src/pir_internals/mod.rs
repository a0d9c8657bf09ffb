pub mod branch_opt_util;
pub mod channel;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod hypercube;
pub mod keyword;
pub mod linalg;
pub mod messages;
pub mod params;
pub mod prf;
pub mod selection;
pub mod session;
pub mod transport;
