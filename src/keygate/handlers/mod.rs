pub mod health;
pub use self::health::health;

pub mod challenge;
pub use self::challenge::generate_challenge;

pub mod verify;
pub use self::verify::verify_signature;
