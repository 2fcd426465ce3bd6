use crate::{jwt::SessionData, schema::UserRole};

const ACTION_TABLE: &[(UserRole, &[ActionType])] = &[
    (
        UserRole::User,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnRelations,
        ],
    ),
    (
        UserRole::Admin,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnRelations,
            ActionType::ManageAllRecipes,
        ],
    ),
];

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionType {
    CreateRecipes,

    ManageOwnRecipes,
    /// Follows, favorites and the shopping cart.
    ManageOwnRelations,

    ManageAllRecipes,
}

impl ActionType {
    pub fn authenticate(self, session: &SessionData) -> bool {
        ACTION_TABLE
            .iter()
            .find(|(role, _)| *role == session.role)
            .map(|(_, actions)| actions.contains(&self))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: UserRole) -> SessionData {
        SessionData {
            user_id: 1,
            username: String::from("alice"),
            is_admin: role == UserRole::Admin,
            role,
        }
    }

    #[test]
    fn users_manage_only_their_own() {
        let user = session(UserRole::User);
        assert!(ActionType::CreateRecipes.authenticate(&user));
        assert!(ActionType::ManageOwnRelations.authenticate(&user));
        assert!(!ActionType::ManageAllRecipes.authenticate(&user));
    }

    #[test]
    fn admins_manage_everything() {
        let admin = session(UserRole::Admin);
        assert!(ActionType::ManageAllRecipes.authenticate(&admin));
        assert!(admin.authenticate(ActionType::ManageOwnRecipes).is_ok());
    }
}
