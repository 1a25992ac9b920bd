/// Database Module
///
/// Native client layer of bgsql. Worker threads drive these synchronous
/// clients; nothing here knows about pools or operations.
///
/// ## Architecture
///
/// - **Driver traits** (`driver.rs`): `Driver`, `NativeHandle` and `ResultSet`, the seam to a native client
/// - **Rows** (`row.rs`): row values and their text/JSON serialization
/// - **SQLite** (`sqlite.rs`): rusqlite-backed driver
/// - **MySQL** (`mysql.rs`, `mysql` feature): blocking MySQL client driver
pub mod driver;
pub mod row;
pub mod sqlite;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use driver::*;
pub use row::*;
pub use sqlite::*;

#[cfg(feature = "mysql")]
pub use self::mysql::MySqlDriver;
