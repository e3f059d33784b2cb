use crate::db::PgClient;
use crate::error::Result;
use bimap::BiMap;
use num::PrimInt;
use std::hash::Hash;
use std::ops::AddAssign;
use tokio_postgres::types::FromSql;
use tracing::trace;

/// Registry of surrogate keys already handed out, and the next one available.
///
/// The core structure is a Bijective Mapping, [BiMap];
///     - on the left, a surrogate key, `PK`, of some integer type compatible with
///     [Postgres Types];
///     - on the right, the natural key, `Obj`, it stands for (a stock symbol, a ratio name).
///
/// Alongside sits `next_key`: the lowest unused key, starting from 1.
///
/// [BiMap]: bimap::BiMap,
/// [Postgres Types]: tokio_postgres::types::FromSql,
///
/// ----------------------------------------------------------------------------------------------
///
/// ## Example
/// ```rust
/// use bimap::BiMap;
/// use stockwh_etl::key_tracker::KeyTracker;
///
/// let mut bimap: BiMap<i32, String> = BiMap::new();
/// bimap.insert(1, "ACB".to_string());
/// bimap.insert(2, "BID".to_string());
/// bimap.insert(4, "FPT".to_string());
///
/// let tracker = KeyTracker::from(bimap);
/// assert_eq!(tracker.see_next_key(), &3);
/// ```
#[derive(Debug)]
pub struct KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign,
    Obj: Eq + Hash,
{
    pub bimap: BiMap<PK, Obj>,
    pub next_key: PK,
}

impl<PK, Obj> KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign + for<'a> FromSql<'a>,
    Obj: Eq + Hash + for<'a> FromSql<'a>,
{
    /// Load a registry from a query returning `(surrogate key, natural key)` rows.
    pub async fn pg_fetch(pg_client: &PgClient, stmt: &str) -> Result<Self> {
        let bimap: BiMap<PK, Obj> = pg_client
            .query(stmt, &[])
            .await?
            .into_iter()
            .map(|row| {
                let key: PK = row.get(0);
                let value: Obj = row.get(1);
                (key, value)
            })
            .collect();

        trace!("key registry loaded with {} entries", bimap.len());
        Ok(Self::from(bimap))
    }
}

impl<PK, Obj> KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign,
    Obj: Eq + Hash,
{
    /// Turn a BiMap into a `KeyTracker`.
    pub fn from(bimap: BiMap<PK, Obj>) -> Self {
        let starting_key = Self::calc_lowest_key(&bimap);
        Self {
            bimap,
            next_key: starting_key,
        }
    }

    /// Finds the lowest available key, starting from 1.
    pub fn calc_lowest_key(map: &BiMap<PK, Obj>) -> PK {
        let mut next_key = PK::one();
        while map.contains_left(&next_key) {
            next_key += PK::one();
        }
        next_key
    }

    /// Advance `next_key` past every key in use.
    pub fn calc_next_key(&mut self) {
        while self.bimap.contains_left(&self.next_key) {
            self.next_key += PK::one();
        }
    }

    pub fn see_next_key(&self) -> &PK {
        &self.next_key
    }

    pub fn contains(&self, value: &Obj) -> bool {
        self.bimap.contains_right(value)
    }

    pub fn len(&self) -> usize {
        self.bimap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bimap.is_empty()
    }

    /// Search the BiMap for an existing value;
    ///     - if it does exist, return the associated key.
    ///     - if it doesn't exist, insert the Value with the `next_key`, returning that key.
    ///
    /// ```rust
    /// use bimap::BiMap;
    /// use stockwh_etl::key_tracker::KeyTracker;
    ///
    /// let mut bimap: BiMap<i32, String> = BiMap::new();
    /// bimap.insert(1, "ACB".to_string());
    /// bimap.insert(3, "CTG".to_string());
    ///
    /// let mut tracker = KeyTracker::from(bimap);
    /// assert_eq!(tracker.transact("CTG".to_string()), 3);
    ///
    /// // a new symbol takes the gap
    /// assert_eq!(tracker.transact("BID".to_string()), 2);
    /// assert_eq!(tracker.see_next_key(), &4);
    /// ```
    pub fn transact(&mut self, value: Obj) -> PK {
        if let Some(key) = self.bimap.get_by_right(&value) {
            return *key;
        }

        let key = self.next_key;
        self.bimap.insert(key, value);
        self.calc_next_key();
        key
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[test]
fn empty_registry_starts_at_one() {
    let mut tracker: KeyTracker<i32, String> = KeyTracker::from(BiMap::new());
    assert!(tracker.is_empty());
    assert_eq!(tracker.transact("ACB".to_string()), 1);
    assert_eq!(tracker.transact("BID".to_string()), 2);
    assert_eq!(tracker.transact("ACB".to_string()), 1);
    assert_eq!(tracker.len(), 2);
}
