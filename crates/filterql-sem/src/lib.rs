//! Validator for the filterql AST.
//!
//! Runs after parsing and before evaluation: resolves every call against an
//! in-scope user function or the builtin registry, and rejects the handful
//! of builtins this sandbox refuses to expose.

mod builtins;
mod error;
mod validator;

pub use builtins::{is_builtin, is_forbidden, BUILTINS, FORBIDDEN};
pub use error::ValidateError;
pub use validator::validate;

#[cfg(test)]
mod tests {
    use super::*;
    use filterql_par::parse;

    fn validate_src(src: &str) -> Result<(), ValidateError> {
        let ast = parse(src).expect("parse should succeed");
        validate(&ast)
    }

    #[test]
    fn accepts_known_builtin() {
        assert!(validate_src(".[] | map(length)").is_ok());
    }

    #[test]
    fn rejects_unknown_function() {
        match validate_src("frobnicate") {
            Err(ValidateError::UnknownFunction { name, arity, .. }) => {
                assert_eq!(name, "frobnicate");
                assert_eq!(arity, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_arity_mismatch() {
        match validate_src("has(1; 2)") {
            Err(ValidateError::ArityMismatch { name, .. }) => assert_eq!(name, "has"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_forbidden_builtin() {
        match validate_src("now") {
            Err(ValidateError::ForbiddenBuiltin { name, .. }) => assert_eq!(name, "now"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_env_variable() {
        match validate_src("$ENV") {
            Err(ValidateError::ForbiddenVariable { name, .. }) => assert_eq!(name, "ENV"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn accepts_recursive_user_function_any_arity() {
        assert!(validate_src("def fact: if . <= 1 then 1 else . * (. - 1 | fact) end; fact").is_ok());
    }

    #[test]
    fn accepts_filter_argument_shadowing_a_name() {
        // `g` is a formal parameter in scope inside the body; calling it
        // bare is accepted without an arity check.
        assert!(validate_src("def apply_twice(g): . | g | g; apply_twice(. + 1)").is_ok());
    }

    #[test]
    fn function_not_visible_outside_its_definition() {
        // `helper` is scoped to the parenthesized def/rest chain; it is not
        // visible once that group closes.
        assert!(validate_src("(def helper: 1; helper) | helper").is_err());
    }
}
