/// Declares a closed set of ARI wire names as a non-exhaustive Rust enum.
///
/// Expands to the enum itself plus `ALL`, `as_str()`, `from_wire()`,
/// `Display`, `AsRef<str>` and a case-insensitive `FromStr` that fails with
/// the given error newtype (`ParseEventTypeError`, `ParseChannelStateError`).
///
/// ```ignore
/// define_wire_enum! {
///     error_type: ParseThingError,
///     /// Things the server can send.
///     pub enum Thing {
///         Foo => "Foo",
///         DialingOffhook => "Dialing Offhook",
///     }
/// }
/// ```
macro_rules! define_wire_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[$( $Name::$variant, )+];

            /// Name as it appears in ARI JSON.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }

            /// Look up a variant by wire name, ignoring ASCII case.
            pub fn from_wire(s: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_wire(s).ok_or_else(|| $Err(s.to_string()))
            }
        }
    };
}
