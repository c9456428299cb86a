//! The registry of (name, arity) pairs the validator accepts for calls that
//! resolve to no in-scope user function. This is the call-resolution half of
//! the registry; `filterql-eval` owns the matching implementations and must
//! be kept in lockstep with this list.

/// Every builtin this sandbox implements, as `(name, arity)`.
pub static BUILTINS: &[(&str, usize)] = &[
    // Types and conversion
    ("type", 0),
    ("tostring", 0),
    ("tonumber", 0),
    ("length", 0),
    ("toboolean", 0),
    ("not", 0),
    ("empty", 0),
    // Keys and membership
    ("keys", 0),
    ("keys_unsorted", 0),
    ("has", 1),
    ("in", 1),
    ("contains", 1),
    ("inside", 1),
    // Collection transforms
    ("map", 1),
    ("select", 1),
    ("sort", 0),
    ("sort_by", 1),
    ("unique", 0),
    ("unique_by", 1),
    ("group_by", 1),
    ("reverse", 0),
    ("flatten", 0),
    ("flatten", 1),
    ("transpose", 0),
    ("bsearch", 1),
    ("combinations", 0),
    ("combinations", 1),
    // Entries
    ("to_entries", 0),
    ("from_entries", 0),
    ("with_entries", 1),
    // Strings
    ("split", 1),
    ("join", 1),
    ("startswith", 1),
    ("endswith", 1),
    ("index", 1),
    ("rindex", 1),
    ("indices", 1),
    ("explode", 0),
    ("implode", 0),
    ("ltrimstr", 1),
    ("rtrimstr", 1),
    ("ascii_upcase", 0),
    ("ascii_downcase", 0),
    // Paths
    ("paths", 0),
    ("getpath", 1),
    ("setpath", 2),
    ("delpaths", 1),
    ("path", 1),
    // Generators and iterators
    ("range", 1),
    ("range", 2),
    ("range", 3),
    ("limit", 2),
    ("first", 1),
    ("last", 1),
    ("nth", 2),
    ("isempty", 1),
    ("all", 1),
    ("any", 1),
    ("recurse", 1),
    ("while", 2),
    ("until", 2),
    ("repeat", 1),
    ("walk", 1),
    // Math
    ("floor", 0),
    ("ceil", 0),
    ("round", 0),
    ("abs", 0),
    ("sqrt", 0),
    ("isnan", 0),
    ("isfinite", 0),
    ("infinite", 0),
    ("min", 0),
    ("max", 0),
    ("min_by", 1),
    ("max_by", 1),
    ("add", 0),
    // Errors
    ("error", 1),
];

/// Builtins the sandbox refuses to expose: they would leak wall-clock time,
/// environment, or filesystem/module access.
pub static FORBIDDEN: &[&str] = &["now", "input", "inputs", "env", "import", "include"];

pub fn arities_for(name: &str) -> Vec<usize> {
    BUILTINS
        .iter()
        .filter(|(n, _)| *n == name)
        .map(|(_, a)| *a)
        .collect()
}

pub fn is_builtin(name: &str, arity: usize) -> bool {
    BUILTINS.iter().any(|(n, a)| *n == name && *a == arity)
}

pub fn is_forbidden(name: &str) -> bool {
    FORBIDDEN.contains(&name)
}
