pub const MAIN_LOOP_TIME: &str = "consume_loop_time_ms";
pub const CHAIN_TIME: &str = "delivery_chain_time_ms";
pub const RECORDS_RECEIVED: &str = "records_received";
pub const RECORDS_COMMITTED: &str = "records_committed";
pub const RECORDS_REDELIVERED: &str = "records_left_for_redelivery";
pub const DELIVERY_OUTCOMES: &str = "delivery_outcomes";
pub const CLASSIFIED_FAILURES: &str = "classified_failures";
pub const UNCLASSIFIED_ERRORS: &str = "unclassified_stage_errors";
pub const RETRIES: &str = "delivery_retries";
pub const BREAKER_SHORT_CIRCUITS: &str = "breaker_short_circuits";
pub const BREAKER_TRANSITIONS: &str = "breaker_transitions";
pub const DEAD_LETTERS_PRODUCED: &str = "dead_letters_produced";
pub const DEAD_LETTER_PUBLISH_FAILURES: &str = "dead_letter_publish_failures";
pub const POISON_PILLS: &str = "poison_pills";
