use std::collections::HashMap;

use serde::Serialize;

use crate::schema::CartLine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

/// Ingredient totals of a cart, in the order each (name, unit) pair was first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShoppingList {
    items: Vec<ShoppingItem>,
}

impl ShoppingList {
    pub fn items(&self) -> &[ShoppingItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str, measurement_unit: &str) -> Option<i64> {
        self.items
            .iter()
            .find(|item| item.name == name && item.measurement_unit == measurement_unit)
            .map(|item| item.amount)
    }

    pub fn total(&self) -> i64 {
        self.items.iter().map(|item| item.amount).sum()
    }
}

/// Sums amounts of lines sharing the same ingredient name and unit.
///
/// Units are never converted: "Salt, g" and "Salt, kg" stay separate items.
pub fn aggregate<I>(lines: I) -> ShoppingList
where
    I: IntoIterator<Item = CartLine>,
{
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut items: Vec<ShoppingItem> = vec![];

    for line in lines {
        let key = (line.name, line.measurement_unit);
        match index.get(&key) {
            Some(&position) => items[position].amount += i64::from(line.amount),
            None => {
                index.insert(key.clone(), items.len());
                items.push(ShoppingItem {
                    name: key.0,
                    measurement_unit: key.1,
                    amount: i64::from(line.amount),
                });
            }
        }
    }

    ShoppingList { items }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_two_recipes_in_first_seen_order() {
        let recipe_1 = vec![CartLine::new("Salt", "g", 10), CartLine::new("Egg", "pc", 2)];
        let recipe_2 = vec![CartLine::new("Salt", "g", 5), CartLine::new("Milk", "ml", 200)];

        let list = aggregate(recipe_1.into_iter().chain(recipe_2));

        let items: Vec<(&str, i64, &str)> = list
            .items()
            .iter()
            .map(|i| (i.name.as_str(), i.amount, i.measurement_unit.as_str()))
            .collect();
        assert_eq!(
            items,
            vec![("Salt", 15, "g"), ("Egg", 2, "pc"), ("Milk", 200, "ml")]
        );
    }

    #[test]
    fn empty_cart_gives_empty_list() {
        let list = aggregate(Vec::new());
        assert!(list.is_empty());
        assert_eq!(list.total(), 0);
    }

    #[test]
    fn same_name_different_unit_stays_apart() {
        let list = aggregate(vec![
            CartLine::new("Sugar", "g", 100),
            CartLine::new("Sugar", "tbsp", 2),
            CartLine::new("Sugar", "g", 50),
        ]);

        assert_eq!(list.len(), 2);
        assert_eq!(list.get("Sugar", "g"), Some(150));
        assert_eq!(list.get("Sugar", "tbsp"), Some(2));
    }

    #[test]
    fn total_is_preserved() {
        let lines: Vec<CartLine> = (0..50)
            .map(|n| CartLine::new(&format!("item-{}", n % 7), ["g", "ml"][n % 2], n as i32 + 1))
            .collect();
        let expected: i64 = lines.iter().map(|l| i64::from(l.amount)).sum();

        assert_eq!(aggregate(lines).total(), expected);
    }

    #[test]
    fn large_amounts_do_not_overflow() {
        let list = aggregate(vec![
            CartLine::new("Water", "ml", i32::MAX),
            CartLine::new("Water", "ml", i32::MAX),
        ]);
        assert_eq!(list.get("Water", "ml"), Some(2 * i64::from(i32::MAX)));
    }
}
