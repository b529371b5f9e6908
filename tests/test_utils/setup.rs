use gentree::{config, utils};

/// Small pages keep the trees of the tests shallow and cheap to scan.
pub const TEST_PAGE_SIZE: usize = 1024;

/// # Conduct the initialization
///
/// - Setting up log configurations.
/// - Reset page size.
pub fn setup() {
    utils::init_log();
    config::set_page_size(TEST_PAGE_SIZE);
}
