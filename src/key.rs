use std::borrow::Borrow;
use std::fmt;

/// Identifies one cached value, conventionally `"{namespace}-{discriminator}"`.
///
/// The key is both the store lookup key and the identity of the recomputation lock, so it must
/// be stable and unique per logical computation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(namespace: impl fmt::Display, discriminator: impl fmt::Display) -> Self {
        Self(format!("{namespace}-{discriminator}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

/// An expensive computation whose result is cached under a key derived from its inputs.
///
/// Implementors describe what makes one invocation different from another in
/// [`CachedMethod::discriminator`]; the type name serves as namespace so that two methods with
/// the same discriminator never share an entry.
///
/// ```
/// use stampede_cache::{CachedMethod, Config, MemoryStore, StampedeCache};
/// use std::convert::Infallible;
///
/// struct TopSellers {
///     category: u32,
/// }
///
/// impl CachedMethod for TopSellers {
///     type Output = Vec<String>;
///     type Error = Infallible;
///
///     fn discriminator(&self) -> String {
///         self.category.to_string()
///     }
///
///     fn load(&self) -> Result<Self::Output, Self::Error> {
///         Ok(vec![String::from("teapot")])
///     }
/// }
///
/// let cache = StampedeCache::new(MemoryStore::new(), Config::default()).unwrap();
/// let sellers = cache.get_method(&TopSellers { category: 7 }).unwrap();
/// assert_eq!(sellers, vec![String::from("teapot")]);
/// ```
pub trait CachedMethod {
    type Output;
    type Error;

    fn discriminator(&self) -> String;

    fn load(&self) -> Result<Self::Output, Self::Error>;

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(std::any::type_name::<Self>(), self.discriminator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    struct Orders(u64);

    impl CachedMethod for Orders {
        type Output = u64;
        type Error = Infallible;

        fn discriminator(&self) -> String {
            format!("customer:{}", self.0)
        }

        fn load(&self) -> Result<u64, Infallible> {
            Ok(self.0 * 2)
        }
    }

    struct Invoices(u64);

    impl CachedMethod for Invoices {
        type Output = u64;
        type Error = Infallible;

        fn discriminator(&self) -> String {
            format!("customer:{}", self.0)
        }

        fn load(&self) -> Result<u64, Infallible> {
            Ok(self.0)
        }
    }

    #[test]
    fn it_joins_namespace_and_discriminator() {
        // when
        let key = CacheKey::new("orders", 42);

        // then
        assert_eq!(key.as_str(), "orders-42");
        assert_eq!(key.to_string(), "orders-42");
        assert_eq!(CacheKey::from("orders-42"), key);
    }

    #[test]
    fn it_namespaces_method_keys_by_type() {
        // when
        let orders = Orders(1).cache_key();
        let invoices = Invoices(1).cache_key();

        // then
        assert_ne!(orders, invoices);
        assert!(orders.as_str().ends_with("Orders-customer:1"));
        assert!(invoices.as_str().ends_with("Invoices-customer:1"));
    }
}
