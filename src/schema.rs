// Arbor schema - skill tree tables for Diesel ORM

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    tokens (id) {
        id -> Integer,
        user_id -> Integer,
        token -> Text,
        expires_at -> Text,
    }
}

diesel::table! {
    skill_trees (id) {
        id -> Integer,
        name -> Text,
        description -> Nullable<Text>,
        creator_username -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    skills (id) {
        id -> Integer,
        name -> Text,
        description -> Nullable<Text>,
        skill_tree_id -> Integer,
        is_root -> Bool,
        linked_tree_id -> Nullable<Integer>,
        created_at -> Text,
    }
}

diesel::table! {
    skill_dependencies (skill_id, unlock_id) {
        skill_id -> Integer,
        unlock_id -> Integer,
    }
}

diesel::table! {
    tags (id) {
        id -> Integer,
        name -> Text,
    }
}

diesel::table! {
    skill_tree_tags (skill_tree_id, tag_id) {
        skill_tree_id -> Integer,
        tag_id -> Integer,
    }
}

diesel::table! {
    user_favorite_trees (user_id, skill_tree_id) {
        user_id -> Integer,
        skill_tree_id -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    user_check_skill (id) {
        id -> Integer,
        user_id -> Integer,
        skill_id -> Integer,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    tokens,
    skill_trees,
    skills,
    skill_dependencies,
    tags,
    skill_tree_tags,
    user_favorite_trees,
    user_check_skill,
);
