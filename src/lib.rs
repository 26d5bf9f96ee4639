mod attribute_value;
mod bucketing;
mod eval;
mod lookup;
mod ops;
mod spec;
mod store;
mod test_common;
mod user;
mod util;

pub use attribute_value::*;
pub use eval::*;
pub use lookup::*;
pub use ops::*;
pub use spec::*;
pub use store::*;
pub use user::*;
