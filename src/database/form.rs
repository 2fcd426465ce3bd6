use std::collections::HashSet;

use serde::Deserialize;

use crate::{
    constants::{
        RECIPE_NAME_MAX_LENGTH, RESERVED_USERNAMES, USERNAME_MAX_LENGTH, USERNAME_MIN_LENGTH,
    },
    error::{Error, ValidationErrors},
    media::{decode_data_uri, DecodedImage},
    schema::Id,
};

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IngredientAmount {
    pub id: Id,
    pub amount: i64,
}

/// Write model for recipe create and update.
///
/// Every field is optional at the serde level so that missing fields are
/// reported per field instead of as a body parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecipeForm {
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i64>,
    pub image: Option<String>,
    pub tags: Option<Vec<Id>>,
    pub ingredients: Option<Vec<IngredientAmount>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Update,
}

/// A recipe form that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDraft {
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
    pub image: Option<DecodedImage>,
    pub tags: Vec<Id>,
    pub ingredients: Vec<(Id, i32)>,
}

impl RecipeForm {
    pub fn validate(self, mode: FormMode) -> Result<RecipeDraft, Error> {
        let mut errors = ValidationErrors::new();

        let name = required_text(&mut errors, "name", self.name);
        if name.chars().count() > RECIPE_NAME_MAX_LENGTH {
            errors.add(
                "name",
                format!("Ensure this field has no more than {RECIPE_NAME_MAX_LENGTH} characters."),
            );
        }
        let text = required_text(&mut errors, "text", self.text);

        let cooking_time = match self.cooking_time {
            None => {
                errors.add("cooking_time", REQUIRED);
                0
            }
            Some(minutes) => match positive(minutes) {
                Some(minutes) => minutes,
                None => {
                    errors.add("cooking_time", "Cooking time must be at least 1 minute");
                    0
                }
            },
        };

        let image = match (self.image, mode) {
            (None, FormMode::Create) => {
                errors.add("image", REQUIRED);
                None
            }
            (None, FormMode::Update) => None,
            (Some(uri), _) => match decode_data_uri(&uri) {
                Ok(image) => Some(image),
                Err(message) => {
                    errors.add("image", message);
                    None
                }
            },
        };

        let tags = self.tags.unwrap_or_default();
        if tags.is_empty() {
            errors.add("tags", "Pick at least one tag");
        }
        let mut seen = HashSet::new();
        if tags.iter().any(|id| !seen.insert(*id)) {
            errors.add("tags", "Tags must not repeat");
        }

        let lines = self.ingredients.unwrap_or_default();
        if lines.is_empty() {
            errors.add("ingredients", "Add at least one ingredient");
        }
        let mut seen = HashSet::new();
        let mut ingredients = Vec::with_capacity(lines.len());
        for line in lines {
            if !seen.insert(line.id) {
                errors.add(
                    "ingredients",
                    format!("Ingredient {} is listed more than once", line.id),
                );
                continue;
            }
            match positive(line.amount) {
                Some(amount) => ingredients.push((line.id, amount)),
                None => errors.add(
                    "ingredients",
                    format!("Amount of ingredient {} must be at least 1", line.id),
                ),
            }
        }

        errors.into_result()?;

        Ok(RecipeDraft {
            name,
            text,
            cooking_time,
            image,
            tags,
            ingredients,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl RegisterForm {
    pub fn validate(self) -> Result<Registration, Error> {
        let mut errors = ValidationErrors::new();

        let email = required_text(&mut errors, "email", self.email);
        if !email.is_empty() && !looks_like_email(&email) {
            errors.add("email", "Enter a valid email address.");
        }
        let username = required_text(&mut errors, "username", self.username);
        if !username.is_empty() {
            if let Err(message) = validate_username(&username) {
                errors.add("username", message);
            }
        }
        let first_name = required_text(&mut errors, "first_name", self.first_name);
        let last_name = required_text(&mut errors, "last_name", self.last_name);
        let password = required_text(&mut errors, "password", self.password);

        errors.into_result()?;

        Ok(Registration {
            email,
            username,
            first_name,
            last_name,
            password,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let length = username.chars().count();
    if length < USERNAME_MIN_LENGTH {
        return Err(format!(
            "Username must be at least {USERNAME_MIN_LENGTH} characters long"
        ));
    }
    if length > USERNAME_MAX_LENGTH {
        return Err(format!(
            "Username must be at most {USERNAME_MAX_LENGTH} characters long"
        ));
    }
    if username.chars().all(|c| c.is_ascii_digit()) {
        return Err(String::from("Username can't consist of digits only"));
    }
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(username))
    {
        return Err(format!("Username {username} is reserved"));
    }

    let mut invalid: Vec<char> = username
        .chars()
        .filter(|c| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
        .collect();
    if !invalid.is_empty() {
        invalid.sort_unstable();
        invalid.dedup();
        let invalid: String = invalid.into_iter().collect();
        return Err(format!("Username can't contain '{invalid}'"));
    }

    Ok(())
}

fn required_text(errors: &mut ValidationErrors, field: &str, value: Option<String>) -> String {
    match value.map(|v| v.trim().to_string()) {
        None => {
            errors.add(field, REQUIRED);
            String::new()
        }
        Some(v) if v.is_empty() => {
            errors.add(field, BLANK);
            v
        }
        Some(v) => v,
    }
}

fn positive(value: i64) -> Option<i32> {
    i32::try_from(value).ok().filter(|v| *v >= 1)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok};

    use super::*;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn form(cooking_time: i64) -> RecipeForm {
        RecipeForm {
            name: Some(String::from("Borscht")),
            text: Some(String::from("Boil the beets.")),
            cooking_time: Some(cooking_time),
            image: Some(String::from(PIXEL)),
            tags: Some(vec![1, 2]),
            ingredients: Some(vec![
                IngredientAmount { id: 1, amount: 10 },
                IngredientAmount { id: 2, amount: 2 },
            ]),
        }
    }

    fn field_errors(result: Result<RecipeDraft, Error>) -> ValidationErrors {
        match result {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn cooking_time_zero_is_rejected() {
        let errors = field_errors(form(0).validate(FormMode::Create));
        assert!(errors.contains("cooking_time"));
    }

    #[test]
    fn cooking_time_one_is_accepted() {
        let draft = assert_ok!(form(1).validate(FormMode::Create));
        assert_eq!(draft.cooking_time, 1);
        assert_eq!(draft.ingredients, vec![(1, 10), (2, 2)]);
        assert_eq!(draft.image.map(|i| i.extension), Some(String::from("png")));
    }

    #[test]
    fn every_problem_is_reported_at_once() {
        let bad = RecipeForm {
            name: Some(String::from("   ")),
            text: None,
            cooking_time: Some(-5),
            image: None,
            tags: Some(vec![3, 3]),
            ingredients: Some(vec![
                IngredientAmount { id: 1, amount: 0 },
                IngredientAmount { id: 1, amount: 4 },
            ]),
        };
        let errors = field_errors(bad.validate(FormMode::Create));

        for field in ["name", "text", "cooking_time", "image", "tags", "ingredients"] {
            assert!(errors.contains(field), "missing error for {field}");
        }
        assert_eq!(errors.messages("ingredients").len(), 2);
    }

    #[test]
    fn update_may_keep_the_old_image() {
        let mut update = form(30);
        update.image = None;
        let draft = assert_ok!(update.validate(FormMode::Update));
        assert!(draft.image.is_none());
    }

    #[test]
    fn empty_ingredient_list_is_rejected() {
        let mut empty = form(30);
        empty.ingredients = Some(vec![]);
        let errors = field_errors(empty.validate(FormMode::Create));
        assert!(errors.contains("ingredients"));
    }

    #[test]
    fn bad_image_is_a_field_error() {
        let mut bad = form(30);
        bad.image = Some(String::from("not an image"));
        let errors = field_errors(bad.validate(FormMode::Create));
        assert!(errors.contains("image"));
    }

    #[test]
    fn username_rules() {
        assert_ok!(validate_username("alice"));
        assert_ok!(validate_username("chef_42-b"));
        assert_err!(validate_username("al"));
        assert_err!(validate_username("123456"));
        assert_err!(validate_username("Admin"));
        assert_err!(validate_username("me"));
        assert_err!(validate_username("bad name!"));
    }

    #[test]
    fn registration_requires_every_field() {
        let result = RegisterForm {
            email: Some(String::from("alice@example.com")),
            username: Some(String::from("alice")),
            ..Default::default()
        }
        .validate();

        match result {
            Err(Error::Validation(errors)) => {
                assert!(errors.contains("first_name"));
                assert!(errors.contains("last_name"));
                assert!(errors.contains("password"));
                assert!(!errors.contains("email"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn registration_rejects_bad_email() {
        let result = RegisterForm {
            email: Some(String::from("alice")),
            username: Some(String::from("alice")),
            first_name: Some(String::from("Alice")),
            last_name: Some(String::from("Liddell")),
            password: Some(String::from("hunter22")),
        }
        .validate();
        assert!(matches!(result, Err(Error::Validation(e)) if e.contains("email")));
    }
}
