pub const DEFAULT_PAGE_SIZE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const RECIPE_NAME_MAX_LENGTH: usize = 200;
pub const USERNAME_MAX_LENGTH: usize = 150;
pub const USERNAME_MIN_LENGTH: usize = 3;
pub const RESERVED_USERNAMES: &[&str] = &["me", "admin", "moderator"];

pub const SESSION_COOKIE: &str = "session";

pub const SHOPPING_LIST_FILENAME: &str = "shopping_cart.pdf";
pub const SHOPPING_LIST_TITLE: &str = "Shopping list";

// A4 in points
pub const PAGE_WIDTH: i32 = 595;
pub const PAGE_HEIGHT: i32 = 842;
pub const FONT_SIZE: i32 = 14;
pub const TITLE_X: i32 = 100;
pub const TITLE_Y: i32 = 750;
pub const LINE_X: i32 = 80;
pub const FIRST_LINE_Y: i32 = 700;
pub const LINE_STEP: i32 = 25;
pub const LINES_PER_PAGE: usize = 26;

pub const MEDIA_URL: &str = "/media/";
pub const RECIPE_IMAGE_DIR: &str = "recipes";
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
