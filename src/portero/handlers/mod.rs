pub mod health;
pub use self::health::health;

pub mod auth;
pub use self::auth::auth;

pub mod callback;
pub use self::callback::callback;

pub mod records;
pub use self::records::user_record;
