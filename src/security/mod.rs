pub mod crypto;
pub mod csrf;
pub mod secret_protector;
