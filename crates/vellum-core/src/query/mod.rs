pub mod eval;
pub mod filter;
pub mod spec;
pub mod translate;

pub use filter::NativeFilter;
pub use spec::{field, literal, CompareOp, FieldRef, Operand, Predicate, QueryOp, QuerySpec};
pub use translate::{translate, Translation};
