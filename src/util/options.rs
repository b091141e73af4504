//! Numeric configuration of an arena.
//!
//! Options are read once when an [`crate::Arena`] is created and never change afterwards.
//! `Options::default()` starts from the built-in defaults and then applies every environment
//! variable of the form `SHIELDGC_<OPTION_NAME>` (for example `SHIELDGC_TRACE_QUANTUM=8192`).
//! Values that cannot be parsed or that fail validation are ignored with a warning.

use crate::util::constants::*;
use crate::util::log::{trace, warn};
use std::default::Default;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn positive(v: &usize) -> bool {
    *v > 0
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake case name. Returns false if the name is unknown, or
            /// the value cannot be parsed, or the value is invalid. The option keeps its old
            /// value in that case.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (from an env var or a caller) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// The built-in defaults, ignoring the environment.
            pub fn builtin() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::builtin();

                // If we have env vars that start with SHIELDGC_ and match any option (such as SHIELDGC_TRACE_QUANTUM),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "SHIELDGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Size of the first address space reservation.
    arena_size:           usize [positive] = DEFAULT_ARENA_SIZE,
    // Minimum size of each later reservation.
    arena_extend_by:      usize [positive] = DEFAULT_ARENA_EXTEND_BY,
    // Upper bound of committed memory, including spare memory.
    commit_limit:         usize [positive] = usize::MAX,
    // log2 of the bytes in a zone stripe.
    zone_shift:           usize [|v: &usize| *v >= LOG_BYTES_IN_PAGE as usize && *v < BITS_IN_WORD] = DEFAULT_ZONE_SHIFT,
    // Free memory kept committed for reuse. Zero returns every freed segment to the platform.
    spare_commit_limit:   usize [always_valid] = DEFAULT_SPARE_COMMIT_LIMIT,
    // Number of covered segments the shield may leave unprotected.
    shield_cache_size:    usize [positive] = DEFAULT_SHIELD_CACHE_SIZE,
    // Bytes of segments scanned by one trace step.
    trace_quantum:        usize [positive] = DEFAULT_TRACE_QUANTUM,
    // Bytes of allocation between two polls that do collection work.
    poll_threshold:       usize [positive] = DEFAULT_POLL_THRESHOLD,
    // Number of traces that may run at the same time.
    max_traces:           usize [|v: &usize| *v > 0 && *v <= TRACE_MAX] = 1,
    // Capacity of the nursery of the default chain.
    nursery_capacity:     usize [positive] = DEFAULT_NURSERY_CAPACITY,
    // Should an allocation that runs out of memory force a full collection and retry?
    collect_on_oom:       bool  [always_valid] = true,
}

impl Options {
    /// Set an option by its camel case name, such as `traceQuantum`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// Bytes per zone stripe.
    pub fn zone_stripe_bytes(&self) -> usize {
        1 << self.zone_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::options::Options;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.trace_quantum, DEFAULT_TRACE_QUANTUM);
            assert_eq!(options.max_traces, 1);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SHIELDGC_TRACE_QUANTUM", "4096");

                    let options = Options::default();
                    assert_eq!(options.trace_quantum, 4096);
                },
                || {
                    std::env::remove_var("SHIELDGC_TRACE_QUANTUM");
                },
            )
        })
    }

    #[test]
    fn with_multiple_valid_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SHIELDGC_SHIELD_CACHE_SIZE", "4");
                    std::env::set_var("SHIELDGC_COLLECT_ON_OOM", "false");

                    let options = Options::default();
                    assert_eq!(options.shield_cache_size, 4);
                    assert!(!options.collect_on_oom);
                },
                || {
                    std::env::remove_var("SHIELDGC_SHIELD_CACHE_SIZE");
                    std::env::remove_var("SHIELDGC_COLLECT_ON_OOM");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // invalid value, we cannot parse the value, so use the default value
                    std::env::set_var("SHIELDGC_TRACE_QUANTUM", "abc");

                    let options = Options::default();
                    assert_eq!(options.trace_quantum, DEFAULT_TRACE_QUANTUM);
                },
                || {
                    std::env::remove_var("SHIELDGC_TRACE_QUANTUM");
                },
            )
        })
    }

    #[test]
    fn with_env_var_failing_validation() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SHIELDGC_MAX_TRACES", "9");

                    let options = Options::default();
                    assert_eq!(options.max_traces, 1);
                },
                || {
                    std::env::remove_var("SHIELDGC_MAX_TRACES");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_key() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SHIELDGC_ABC", "42");

                    let options = Options::default();
                    assert_eq!(options.trace_quantum, DEFAULT_TRACE_QUANTUM);
                },
                || {
                    std::env::remove_var("SHIELDGC_ABC");
                },
            )
        })
    }

    #[test]
    fn set_from_camelcase() {
        let mut options = Options::builtin();
        assert!(options.set_from_camelcase_str("zoneShift", "16"));
        assert_eq!(options.zone_shift, 16);
        assert_eq!(options.zone_stripe_bytes(), 1 << 16);
        // Zone stripes smaller than a page are rejected.
        assert!(!options.set_from_camelcase_str("zoneShift", "4"));
        assert_eq!(options.zone_shift, 16);
        assert!(!options.set_from_str("no_such_option", "1"));
    }
}
