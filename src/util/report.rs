use super::avg_tracker::AvgTracker;
use ahash::AHashMap;
use std::{
    fmt,
    ops::{AddAssign, Index, IndexMut},
};

#[derive(Debug, Clone, Copy)]
pub enum Reportable {
    Val(f64),
    Avg(AvgTracker),
}

macro_rules! reportable_from_primitive {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Reportable {
                fn from(val: $t) -> Self {
                    Reportable::Val(val as f64)
                }
            }
        )*
    };
}

reportable_from_primitive!(usize, u8, u16, u32, u64, isize, i8, i16, i32, i64, f32);

impl From<f64> for Reportable {
    fn from(val: f64) -> Self {
        Reportable::Val(val)
    }
}

impl From<AvgTracker> for Reportable {
    fn from(val: AvgTracker) -> Self {
        Reportable::Avg(val)
    }
}

impl Default for Reportable {
    fn default() -> Self {
        Reportable::Val(0.0)
    }
}

impl AddAssign<Reportable> for Reportable {
    fn add_assign(&mut self, other: Reportable) {
        match (self, other) {
            (Reportable::Val(a), Reportable::Val(b)) => *a += b,
            (Reportable::Avg(a), Reportable::Avg(b)) => *a += b,
            (a, b) => *a = b,
        }
    }
}

impl Reportable {
    /// The plain value, or the mean of an average.
    pub fn get(&self) -> f64 {
        match self {
            Reportable::Val(val) => *val,
            Reportable::Avg(avg) => avg.get(),
        }
    }
}

/// Named training and evaluation figures.
#[derive(Debug, Clone, Default)]
pub struct Report {
    title: String,
    data: AHashMap<String, Reportable>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let title = if self.title.is_empty() {
            "Report"
        } else {
            self.title.as_str()
        };
        writeln!(f, "{0}{title}{0}", "-".repeat(25))?;

        let mut items: Vec<_> = self.data.iter().collect();
        items.sort_unstable_by(|a, b| a.0.cmp(b.0));

        for (key, val) in items {
            writeln!(f, "\t{key}: {}", val.get())?;
        }
        Ok(())
    }
}

impl Report {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: AHashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.data.get(key).map(Reportable::get)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl Index<&str> for Report {
    type Output = Reportable;

    fn index(&self, key: &str) -> &Self::Output {
        &self.data[key]
    }
}

impl IndexMut<&str> for Report {
    fn index_mut(&mut self, key: &str) -> &mut Self::Output {
        self.data.entry(key.to_string()).or_default()
    }
}

impl AddAssign<&Report> for Report {
    fn add_assign(&mut self, other: &Report) {
        for (key, val) in other.data.iter() {
            self[key.as_str()] += *val;
        }
    }
}
