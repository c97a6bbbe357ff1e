diesel::table! {
    builds (id) {
        id -> BigInt,
        pkg_name -> Text,
        pkg_id -> Text,
        recipe_path -> Text,
        status -> Text,
        priority -> Integer,
        arch -> Text,
        force_build -> Bool,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        duration_seconds -> Nullable<BigInt>,
        error_message -> Nullable<Text>,
        build_log_url -> Nullable<Text>,
    }
}

diesel::table! {
    sync_state (id) {
        id -> BigInt,
        repo_name -> Text,
        last_commit_hash -> Nullable<Text>,
        last_sync_time -> Timestamp,
        packages_synced -> Integer,
    }
}

diesel::table! {
    metadata (key) {
        key -> Text,
        value -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}
