pub mod timeedit;
pub mod union_portal;
