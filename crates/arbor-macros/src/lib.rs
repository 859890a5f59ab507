//! Declarative macros for arbor-rs.

/// Generates `as_str`, `parse_str`, and a `Display` impl for a unit enum
/// with a canonical string form per variant.
///
/// # Example
///
/// ```ignore
/// str_enum! {
///     impl MyEnum {
///         Foo => "foo",
///         Bar => "bar",
///     }
/// }
/// ```
///
/// This generates:
/// - `as_str(&self)` returning the canonical string
/// - `parse_str(&str)` returning the variant for a canonical string
/// - `impl Display` writing the canonical string
#[macro_export]
macro_rules! str_enum {
    (
        impl $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            #[allow(dead_code)]
            pub fn parse_str(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
