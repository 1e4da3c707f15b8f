/// A slot that may be written exactly once and read any number of times.
/// Writing twice or reading before the first write panics.
#[derive(Clone, PartialEq, Eq)]
pub struct SetOnce<T> {
    inner: Option<T>,
}

impl<T> std::fmt::Debug for SetOnce<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(value) => std::fmt::Debug::fmt(value, f),
            None => write!(f, "<unset>"),
        }
    }
}

impl<T> Default for SetOnce<T> {
    fn default() -> Self {
        SetOnce { inner: None }
    }
}

impl<T> SetOnce<T> {
    pub fn new() -> SetOnce<T> {
        SetOnce::default()
    }

    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    pub fn set(&mut self, value: T) {
        if self.inner.is_some() {
            panic!("write-once slot assigned a second time");
        }
        self.inner = Some(value);
    }

    pub fn get(&self) -> &T {
        match &self.inner {
            Some(value) => value,
            None => panic!("read of an unset write-once slot"),
        }
    }

    #[inline(always)]
    pub fn try_get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    #[inline(always)]
    pub fn try_get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }
}
