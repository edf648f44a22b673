//! Initial database migration.
//!
//! Creates the chart of accounts, the append-only journal, balances,
//! idempotency keys, the processor feed, reconciliation state and the audit
//! trail. Money columns are `BIGINT` minor units.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: CHART OF ACCOUNTS
        // ============================================================
        db.execute_unprepared(ACCOUNTS_SQL).await?;

        // ============================================================
        // PART 2: JOURNAL
        // ============================================================
        db.execute_unprepared(JOURNAL_ENTRIES_SQL).await?;
        db.execute_unprepared(JOURNAL_LINES_SQL).await?;
        db.execute_unprepared(FEE_CALCULATIONS_SQL).await?;
        db.execute_unprepared(ACCOUNT_BALANCES_SQL).await?;
        db.execute_unprepared(IMMUTABILITY_SQL).await?;

        // ============================================================
        // PART 3: IDEMPOTENCY
        // ============================================================
        db.execute_unprepared(IDEMPOTENCY_KEYS_SQL).await?;

        // ============================================================
        // PART 4: PROCESSOR FEED
        // ============================================================
        db.execute_unprepared(FEED_EVENTS_SQL).await?;

        // ============================================================
        // PART 5: RECONCILIATION
        // ============================================================
        db.execute_unprepared(RECONCILIATION_MATCHES_SQL).await?;
        db.execute_unprepared(RECONCILIATION_EXCEPTIONS_SQL).await?;

        // ============================================================
        // PART 6: AUDIT
        // ============================================================
        db.execute_unprepared(AUDIT_RECORDS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

const ACCOUNTS_SQL: &str = r"
CREATE TABLE accounts (
    id              BIGINT PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    category        VARCHAR(16) NOT NULL
                    CHECK (category IN ('asset', 'liability', 'equity', 'income', 'expense')),
    legal_entity    VARCHAR(100) NOT NULL,
    currency        CHAR(3) NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

const JOURNAL_ENTRIES_SQL: &str = r"
CREATE TABLE journal_entries (
    id                  UUID PRIMARY KEY,
    sequence            BIGSERIAL NOT NULL UNIQUE,
    entry_date          DATE NOT NULL,
    description         TEXT NOT NULL,
    source              VARCHAR(32) NOT NULL,
    source_event_id     VARCHAR(255) UNIQUE,
    reverses            UUID UNIQUE REFERENCES journal_entries(id),
    reference_amount    BIGINT,
    template            VARCHAR(100),
    created_at          TIMESTAMPTZ NOT NULL,
    posted_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX idx_journal_entries_date ON journal_entries(entry_date, sequence);
";

const JOURNAL_LINES_SQL: &str = r"
CREATE TABLE journal_lines (
    entry_id        UUID NOT NULL REFERENCES journal_entries(id),
    line_no         INTEGER NOT NULL,
    account_id      BIGINT NOT NULL REFERENCES accounts(id),
    direction       VARCHAR(6) NOT NULL CHECK (direction IN ('debit', 'credit')),
    amount          BIGINT NOT NULL CHECK (amount > 0),
    currency        CHAR(3) NOT NULL,
    memo            TEXT,
    PRIMARY KEY (entry_id, line_no)
);

CREATE INDEX idx_journal_lines_account ON journal_lines(account_id);
";

const FEE_CALCULATIONS_SQL: &str = r"
CREATE TABLE fee_calculations (
    entry_id        UUID PRIMARY KEY REFERENCES journal_entries(id),
    rule_id         UUID,
    rule_version    INTEGER,
    return_code     VARCHAR(8),
    total_fee       BIGINT NOT NULL,
    net_amount      BIGINT NOT NULL,
    detail          JSONB NOT NULL
);
";

const ACCOUNT_BALANCES_SQL: &str = r"
CREATE TABLE account_balances (
    account_id      BIGINT PRIMARY KEY REFERENCES accounts(id),
    debits          BIGINT NOT NULL DEFAULT 0,
    credits         BIGINT NOT NULL DEFAULT 0,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

// Posted entries are immutable; corrections are reversals.
const IMMUTABILITY_SQL: &str = r"
CREATE OR REPLACE FUNCTION reject_journal_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'journal rows are append-only (% on %)', TG_OP, TG_TABLE_NAME;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_journal_entries_immutable
    BEFORE UPDATE OR DELETE ON journal_entries
    FOR EACH ROW EXECUTE FUNCTION reject_journal_mutation();

CREATE TRIGGER trg_journal_lines_immutable
    BEFORE UPDATE OR DELETE ON journal_lines
    FOR EACH ROW EXECUTE FUNCTION reject_journal_mutation();
";

const IDEMPOTENCY_KEYS_SQL: &str = r"
CREATE TABLE idempotency_keys (
    key             VARCHAR(255) PRIMARY KEY,
    reserved_at     TIMESTAMPTZ NOT NULL,
    entry_id        UUID REFERENCES journal_entries(id),
    completed_at    TIMESTAMPTZ
);
";

const FEED_EVENTS_SQL: &str = r"
CREATE TABLE feed_events (
    id              BIGSERIAL PRIMARY KEY,
    event_id        VARCHAR(255) NOT NULL,
    occurred_on     DATE NOT NULL,
    payload         JSONB NOT NULL,
    imported_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX idx_feed_events_date ON feed_events(occurred_on, id);
CREATE INDEX idx_feed_events_event ON feed_events(event_id);
";

const RECONCILIATION_MATCHES_SQL: &str = r"
CREATE TABLE reconciliation_matches (
    id              UUID PRIMARY KEY,
    entry_id        UUID NOT NULL UNIQUE REFERENCES journal_entries(id),
    event_id        VARCHAR(255) NOT NULL UNIQUE,
    confidence      VARCHAR(8) NOT NULL CHECK (confidence IN ('exact', 'fuzzy', 'manual')),
    score           NUMERIC(5, 4),
    matched_at      TIMESTAMPTZ NOT NULL,
    matched_by      VARCHAR(100) NOT NULL
);
";

const RECONCILIATION_EXCEPTIONS_SQL: &str = r"
CREATE TABLE reconciliation_exceptions (
    id              UUID PRIMARY KEY,
    exception_type  VARCHAR(20) NOT NULL,
    severity        VARCHAR(8) NOT NULL CHECK (severity IN ('low', 'medium', 'high')),
    severity_rank   SMALLINT NOT NULL,
    status          VARCHAR(16) NOT NULL
                    CHECK (status IN ('open', 'under_review', 'resolved', 'dismissed')),
    targets         JSONB NOT NULL,
    fingerprint     VARCHAR(600) NOT NULL UNIQUE,
    amount          BIGINT NOT NULL,
    currency        CHAR(3),
    item_date       DATE NOT NULL,
    detail          TEXT NOT NULL,
    resolution      JSONB,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX idx_exceptions_open ON reconciliation_exceptions(severity_rank DESC, created_at)
    WHERE status IN ('open', 'under_review');
CREATE INDEX idx_exceptions_targets ON reconciliation_exceptions USING GIN (targets);
";

const AUDIT_RECORDS_SQL: &str = r"
CREATE TABLE audit_records (
    id              UUID PRIMARY KEY,
    seq             BIGSERIAL NOT NULL UNIQUE,
    action          VARCHAR(40) NOT NULL,
    actor           VARCHAR(100) NOT NULL,
    target_id       VARCHAR(255) NOT NULL,
    before          JSONB,
    after           JSONB,
    recorded_at     TIMESTAMPTZ NOT NULL
);

CREATE INDEX idx_audit_records_target ON audit_records(target_id, seq);

CREATE TRIGGER trg_audit_records_immutable
    BEFORE UPDATE OR DELETE ON audit_records
    FOR EACH ROW EXECUTE FUNCTION reject_journal_mutation();
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS audit_records CASCADE;
DROP TABLE IF EXISTS reconciliation_exceptions CASCADE;
DROP TABLE IF EXISTS reconciliation_matches CASCADE;
DROP TABLE IF EXISTS feed_events CASCADE;
DROP TABLE IF EXISTS idempotency_keys CASCADE;
DROP TABLE IF EXISTS account_balances CASCADE;
DROP TABLE IF EXISTS fee_calculations CASCADE;
DROP TABLE IF EXISTS journal_lines CASCADE;
DROP TABLE IF EXISTS journal_entries CASCADE;
DROP TABLE IF EXISTS accounts CASCADE;

DROP FUNCTION IF EXISTS reject_journal_mutation();
";
