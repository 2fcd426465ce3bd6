use sqlx::{Pool, Postgres};

use crate::{
    database::error::query_error,
    error::{Error, ValidationErrors},
    schema::{Id, Ingredient, RecipePart},
};

pub async fn get_ingredient(id: Id, pool: &Pool<Postgres>) -> Result<Option<Ingredient>, Error> {
    let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(query_error)?;

    Ok(row)
}

/// Case-insensitive prefix search; no prefix lists everything.
pub async fn search_ingredients(
    prefix: Option<&str>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Ingredient>, Error> {
    let pattern = format!("{}%", escape_like(prefix.unwrap_or("").trim()));

    let rows: Vec<Ingredient> =
        sqlx::query_as("SELECT * FROM ingredients WHERE name ILIKE $1 ORDER BY name, id")
            .bind(pattern)
            .fetch_all(pool)
            .await
            .map_err(query_error)?;

    Ok(rows)
}

pub async fn list_recipe_parts(
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipePart>, Error> {
    let rows: Vec<RecipePart> = sqlx::query_as(
        "
        SELECT i.id AS id, i.name AS name, i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = $1
        ORDER BY ri.id
    ",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    Ok(rows)
}

/// Loads `name,measurement_unit` lines, skipping blanks and rows already present.
pub async fn import_ingredients(data: &str, pool: &Pool<Postgres>) -> Result<u64, Error> {
    let rows = parse_ingredient_rows(data)?;

    let mut tr = pool.begin().await.map_err(query_error)?;
    let mut inserted = 0;
    for (name, unit) in rows {
        let result = sqlx::query(
            "
            INSERT INTO ingredients (name, measurement_unit)
            SELECT $1, $2
            WHERE NOT EXISTS (SELECT 1 FROM ingredients WHERE name = $1 AND measurement_unit = $2)
        ",
        )
        .bind(&name)
        .bind(&unit)
        .execute(&mut *tr)
        .await
        .map_err(query_error)?;
        inserted += result.rows_affected();
    }
    tr.commit().await.map_err(query_error)?;

    log::info!("Imported {inserted} ingredients");
    Ok(inserted)
}

/// Reads headerless `name,measurement_unit` CSV; every bad record is reported.
pub fn parse_ingredient_rows(data: &str) -> Result<Vec<(String, String)>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut rows = vec![];
    let mut errors = ValidationErrors::new();
    for (n, record) in reader.records().enumerate() {
        let row = record.and_then(|record| {
            let line = record.position().map_or(n as u64 + 1, |p| p.line());
            record
                .deserialize::<(String, String)>(None)
                .map(|row| (line, row))
        });

        match row {
            Ok((_, (name, unit))) if !name.is_empty() && !unit.is_empty() => {
                rows.push((name, unit))
            }
            Ok((line, _)) => errors.add(
                "data",
                format!("Line {line} must be `name,measurement_unit`"),
            ),
            Err(e) => {
                let line = e.position().map_or(n as u64 + 1, |p| p.line());
                errors.add("data", format!("Line {line}: {e}"));
            }
        }
    }

    errors.into_result()?;
    Ok(rows)
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn parses_csv_rows() {
        let rows = assert_ok!(parse_ingredient_rows(
            "abricots,g\n\n\"salt, coarse\",g\nmilk , ml\n"
        ));
        assert_eq!(
            rows,
            vec![
                (String::from("abricots"), String::from("g")),
                (String::from("salt, coarse"), String::from("g")),
                (String::from("milk"), String::from("ml")),
            ]
        );
    }

    #[test]
    fn doubled_quotes_are_unescaped() {
        let rows = assert_ok!(parse_ingredient_rows("\"pan 5\"\" wide\",pc\n"));
        assert_eq!(rows, vec![(String::from("pan 5\" wide"), String::from("pc"))]);
    }

    #[test]
    fn every_bad_line_is_reported() {
        let result = parse_ingredient_rows("salt\negg,pc\n,g\n");
        let Err(Error::Validation(errors)) = result else {
            panic!("expected a validation error, got {result:?}");
        };
        let messages = errors.messages("data");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Line 1"));
        assert!(messages[1].starts_with("Line 3"));
    }

    #[test]
    fn rejects_rows_without_unit() {
        assert_err!(parse_ingredient_rows("salt\n"));
        assert_err!(parse_ingredient_rows("salt,\n"));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
