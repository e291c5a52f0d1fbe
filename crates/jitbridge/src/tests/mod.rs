mod counter_concurrency;
mod fatal_paths;
mod library_race;
mod test_helpers;
