pub mod cascade;
pub mod computed;
pub mod css_matcher;
pub mod cssom;
pub mod owned_css;
pub mod specificity;
