mod field;
mod filler;
mod strategy;
mod surface;

pub use field::{
    ControlKind, FieldSpec, FieldValue, FillContext, ListingForm, LogicalField,
};
pub use filler::FormFiller;
pub use strategy::{
    default_chain, KeyboardStrategy, Located, LocatorStrategy, RoleNameStrategy,
    StructuralStrategy, TextAnchorStrategy,
};
pub use surface::{ControlHandle, FormSurface, PageSurface, Probe};
