// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

// Import diesel table macros
use diesel::table;
use diesel::allow_tables_to_appear_in_same_query;

// One managed LINE official account (tenant)
table! {
    channels (id) {
        id -> Integer,
        line_channel_id -> Varchar,
        name -> Varchar,
        channel_secret -> Varchar,
        access_token -> Varchar,
        default_rich_menu_id -> Nullable<Integer>,
        follow_tag_ids -> Array<Integer>,
        webhook_forward_url -> Nullable<Varchar>,
        access_password_hash -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

// A platform end-user known to one channel
table! {
    line_users (id) {
        id -> Integer,
        channel_id -> Integer,
        line_user_id -> Varchar,
        display_name -> Nullable<Varchar>,
        picture_url -> Nullable<Varchar>,
        status_message -> Nullable<Varchar>,
        is_blocked -> Bool,
        internal_name -> Nullable<Varchar>,
        current_rich_menu_id -> Nullable<Integer>,
        last_message_at -> Nullable<Timestamptz>,
        last_message_text -> Nullable<Text>,
        unread_count -> Integer,
        followed_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    tags (id) {
        id -> Integer,
        channel_id -> Integer,
        name -> Varchar,
        color -> Varchar,
        priority -> Integer,
        rich_menu_id -> Nullable<Integer>,
        created_at -> Timestamptz,
    }
}

table! {
    line_user_tags (id) {
        id -> Integer,
        line_user_id -> Integer,
        tag_id -> Integer,
        created_at -> Timestamptz,
    }
}

table! {
    rich_menus (id) {
        id -> Integer,
        channel_id -> Integer,
        name -> Varchar,
        chat_bar_text -> Varchar,
        image_url -> Nullable<Varchar>,
        areas -> Jsonb,
        is_default -> Bool,
        is_active -> Bool,
        display_period_start -> Nullable<Timestamptz>,
        display_period_end -> Nullable<Timestamptz>,
        line_rich_menu_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

// One outbound broadcast campaign
table! {
    messages (id) {
        id -> Integer,
        channel_id -> Integer,
        title -> Varchar,
        contents -> Jsonb,
        status -> Varchar,
        tag_ids -> Array<Integer>,
        scheduled_at -> Nullable<Timestamptz>,
        recipient_count -> Integer,
        success_count -> Integer,
        failure_count -> Integer,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    step_scenarios (id) {
        id -> Integer,
        channel_id -> Integer,
        name -> Varchar,
        trigger_type -> Varchar,
        trigger_tag_id -> Nullable<Integer>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    step_messages (id) {
        id -> Integer,
        scenario_id -> Integer,
        step_order -> Integer,
        delay_minutes -> Integer,
        send_hour -> Nullable<Integer>,
        send_minute -> Nullable<Integer>,
        contents -> Jsonb,
        created_at -> Timestamptz,
    }
}

// One user's progress through one scenario
table! {
    step_executions (id) {
        id -> Integer,
        scenario_id -> Integer,
        line_user_id -> Integer,
        current_step -> Integer,
        next_send_at -> Timestamptz,
        status -> Varchar,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    chat_messages (id) {
        id -> Integer,
        line_user_id -> Integer,
        direction -> Varchar,
        message_type -> Varchar,
        content -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    activity_logs (id) {
        id -> Integer,
        channel_id -> Integer,
        actor -> Varchar,
        action -> Varchar,
        detail -> Jsonb,
        created_at -> Timestamptz,
    }
}

// Allow joining the tables if needed
allow_tables_to_appear_in_same_query!(
    channels,
    line_users,
    tags,
    line_user_tags,
    rich_menus,
    messages,
    step_scenarios,
    step_messages,
    step_executions,
    chat_messages,
    activity_logs,
);
