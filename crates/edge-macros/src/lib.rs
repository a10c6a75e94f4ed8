//! Declarative macros shared by the edge control fabric crates.

/// Generates `as_str`, `parse_str` and a `Display` impl for a string-backed enum.
///
/// Wire values for message fields like `outcome` or `phase` are plain strings;
/// this keeps the mapping in one place per enum.
///
/// ```ignore
/// enum_str! {
///     impl Outcome {
///         pub fn as_str(&self) -> &'static str;
///         pub fn parse_str(raw: &str) -> Option<Self>;
///         variants {
///             Success => ["success"],
///             Error => ["error", "failed"],
///         }
///     }
/// }
/// ```
///
/// The first string of each variant is canonical; the rest are accepted aliases.
#[macro_export]
macro_rules! enum_str {
    (
        impl $name:ident {
            $as_vis:vis fn as_str(&self) -> &'static str;
            $parse_vis:vis fn parse_str($raw:ident : &str) -> Option<Self>;
            variants {
                $($variant:ident => [$first:expr $(, $alias:expr)*]),+ $(,)?
            }
        }
    ) => {
        impl $name {
            $as_vis fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $first,)+
                }
            }

            #[allow(dead_code)]
            $parse_vis fn parse_str($raw: &str) -> Option<Self> {
                match $raw.trim() {
                    $($first $(| $alias)* => Some(Self::$variant),)+
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
