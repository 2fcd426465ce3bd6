//! Follow, favorite and shopping cart membership.
//!
//! Each relation is a set of (subject, object) pairs with two transitions:
//! `create` (absent to present) and `remove` (present to absent). The unique
//! constraint on every relation table decides races: an insert that affects
//! no rows means the pair already existed.

use sqlx::{Pool, Postgres};

use crate::{database::error::query_error, error::Error, schema::Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// follower -> followed user
    Follow,
    /// user -> recipe
    Favorite,
    /// user -> recipe
    Cart,
}

impl Relation {
    pub fn table(self) -> &'static str {
        match self {
            Relation::Follow => "follows",
            Relation::Favorite => "favorites",
            Relation::Cart => "shopping_cart",
        }
    }

    pub fn subject_column(self) -> &'static str {
        match self {
            Relation::Follow => "follower_id",
            Relation::Favorite | Relation::Cart => "user_id",
        }
    }

    pub fn object_column(self) -> &'static str {
        match self {
            Relation::Follow => "following_id",
            Relation::Favorite | Relation::Cart => "recipe_id",
        }
    }

    fn already_present(self) -> &'static str {
        match self {
            Relation::Follow => "You are already subscribed to this user",
            Relation::Favorite => "Recipe is already in favorites",
            Relation::Cart => "Recipe is already in the shopping cart",
        }
    }

    fn not_present(self) -> &'static str {
        match self {
            Relation::Follow => "You are not subscribed to this user",
            Relation::Favorite => "Recipe is not in favorites",
            Relation::Cart => "Recipe is not in the shopping cart",
        }
    }
}

/// Storage of relation pairs.
///
/// `insert` and `delete` report whether a row was actually written or removed.
#[allow(async_fn_in_trait)]
pub trait RelationStore {
    async fn insert(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error>;
    async fn delete(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error>;
    async fn contains(&self, relation: Relation, subject: Id, object: Id)
        -> Result<bool, Error>;
}

impl RelationStore for Pool<Postgres> {
    async fn insert(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            relation.table(),
            relation.subject_column(),
            relation.object_column()
        ))
        .bind(subject)
        .bind(object)
        .execute(self)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            relation.table(),
            relation.subject_column(),
            relation.object_column()
        ))
        .bind(subject)
        .bind(object)
        .execute(self)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn contains(
        &self,
        relation: Relation,
        subject: Id,
        object: Id,
    ) -> Result<bool, Error> {
        let row: Option<(i32,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {} WHERE {} = $1 AND {} = $2",
            relation.table(),
            relation.subject_column(),
            relation.object_column()
        ))
        .bind(subject)
        .bind(object)
        .fetch_optional(self)
        .await
        .map_err(query_error)?;

        Ok(row.is_some())
    }
}

/// Users cannot follow themselves, whatever is already stored.
pub fn check_self_reference(relation: Relation, subject: Id, object: Id) -> Result<(), Error> {
    if relation == Relation::Follow && subject == object {
        return Err(Error::SelfReferenceNotAllowed);
    }
    Ok(())
}

pub async fn create<S: RelationStore>(
    store: &S,
    relation: Relation,
    subject: Id,
    object: Id,
) -> Result<(), Error> {
    check_self_reference(relation, subject, object)?;

    if !store.insert(relation, subject, object).await? {
        return Err(Error::AlreadyExists(relation.already_present().to_string()));
    }

    log::info!("{relation:?} created: {subject} -> {object}");
    Ok(())
}

pub async fn remove<S: RelationStore>(
    store: &S,
    relation: Relation,
    subject: Id,
    object: Id,
) -> Result<(), Error> {
    if !store.delete(relation, subject, object).await? {
        return Err(Error::NoOpDelete(relation.not_present().to_string()));
    }

    log::info!("{relation:?} removed: {subject} -> {object}");
    Ok(())
}

/// Anonymous viewers are never related to anything.
pub async fn is_related<S: RelationStore>(
    store: &S,
    relation: Relation,
    viewer: Option<Id>,
    object: Id,
) -> Result<bool, Error> {
    match viewer {
        Some(subject) => store.contains(relation, subject, object).await,
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use claims::assert_ok;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashSet<(Relation, Id, Id)>>,
        lookups: Mutex<usize>,
    }

    impl RelationStore for MemoryStore {
        async fn insert(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error> {
            Ok(self.rows.lock().unwrap().insert((relation, subject, object)))
        }

        async fn delete(&self, relation: Relation, subject: Id, object: Id) -> Result<bool, Error> {
            Ok(self.rows.lock().unwrap().remove(&(relation, subject, object)))
        }

        async fn contains(
            &self,
            relation: Relation,
            subject: Id,
            object: Id,
        ) -> Result<bool, Error> {
            *self.lookups.lock().unwrap() += 1;
            Ok(self.rows.lock().unwrap().contains(&(relation, subject, object)))
        }
    }

    #[tokio::test]
    async fn second_create_is_already_exists() {
        let store = MemoryStore::default();

        assert_ok!(create(&store, Relation::Favorite, 1, 10).await);
        let second = create(&store, Relation::Favorite, 1, 10).await;

        assert!(matches!(second, Err(Error::AlreadyExists(_))));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_twice_is_no_op_delete() {
        let store = MemoryStore::default();
        assert_ok!(create(&store, Relation::Cart, 1, 10).await);

        assert_ok!(remove(&store, Relation::Cart, 1, 10).await);
        let second = remove(&store, Relation::Cart, 1, 10).await;

        assert!(matches!(second, Err(Error::NoOpDelete(_))));
    }

    #[tokio::test]
    async fn remove_of_absent_pair_is_no_op_delete() {
        let store = MemoryStore::default();
        assert!(matches!(
            remove(&store, Relation::Follow, 1, 2).await,
            Err(Error::NoOpDelete(_))
        ));
    }

    #[tokio::test]
    async fn self_follow_is_rejected_in_any_state() {
        let store = MemoryStore::default();
        assert!(matches!(
            create(&store, Relation::Follow, 3, 3).await,
            Err(Error::SelfReferenceNotAllowed)
        ));

        store.rows.lock().unwrap().insert((Relation::Follow, 3, 3));
        assert!(matches!(
            create(&store, Relation::Follow, 3, 3).await,
            Err(Error::SelfReferenceNotAllowed)
        ));
    }

    #[tokio::test]
    async fn same_ids_are_fine_outside_follow() {
        let store = MemoryStore::default();
        assert_ok!(create(&store, Relation::Favorite, 3, 3).await);
    }

    #[tokio::test]
    async fn relations_do_not_leak_into_each_other() {
        let store = MemoryStore::default();
        assert_ok!(create(&store, Relation::Favorite, 1, 10).await);
        assert_ok!(create(&store, Relation::Cart, 1, 10).await);

        assert_ok!(remove(&store, Relation::Favorite, 1, 10).await);
        assert!(assert_ok!(store.contains(Relation::Cart, 1, 10).await));
        assert!(!assert_ok!(store.contains(Relation::Favorite, 1, 10).await));
    }

    #[tokio::test]
    async fn toggle_cycle_can_repeat() {
        let store = MemoryStore::default();
        for _ in 0..3 {
            assert_ok!(create(&store, Relation::Follow, 1, 2).await);
            assert_ok!(remove(&store, Relation::Follow, 1, 2).await);
        }
    }

    #[tokio::test]
    async fn anonymous_viewer_skips_lookup() {
        let store = MemoryStore::default();
        assert_ok!(create(&store, Relation::Favorite, 1, 10).await);

        assert!(!assert_ok!(is_related(&store, Relation::Favorite, None, 10).await));
        assert_eq!(*store.lookups.lock().unwrap(), 0);
        assert!(assert_ok!(is_related(&store, Relation::Favorite, Some(1), 10).await));
    }
}
