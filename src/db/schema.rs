pub const SCHEMA: &str = r#"
-- Roles: named permission bundles
CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Permissions: fine-grained capabilities like 'users.create'
CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT
);

-- Role to permission mapping
CREATE TABLE IF NOT EXISTS role_permissions (
    role_id INTEGER NOT NULL,
    permission_id INTEGER NOT NULL,
    PRIMARY KEY (role_id, permission_id),
    FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE,
    FOREIGN KEY (permission_id) REFERENCES permissions(id) ON DELETE CASCADE
);

-- Application accounts
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_admin INTEGER NOT NULL DEFAULT 0,
    role_id INTEGER,
    theme TEXT NOT NULL DEFAULT 'light',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_login TEXT,
    FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

-- Typed key/value application settings
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT,
    type TEXT NOT NULL DEFAULT 'text',  -- text | number | boolean | select | json | color
    description TEXT,
    category TEXT DEFAULT 'general',
    options TEXT  -- JSON array string for select type
);

CREATE INDEX IF NOT EXISTS idx_settings_category ON settings(category);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    action TEXT NOT NULL,      -- login, created, updated, deleted, backup, restore ...
    resource TEXT,             -- user, role, setting, database ...
    resource_id INTEGER,
    details TEXT,
    ip_address TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);

-- Customers
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    attn TEXT DEFAULT '',
    address TEXT DEFAULT '',
    city TEXT DEFAULT '',
    state TEXT DEFAULT '',
    zip_code TEXT DEFAULT '',
    phone TEXT DEFAULT '',
    email TEXT DEFAULT '',
    notes TEXT DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(name);

-- Invoices
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_number TEXT NOT NULL UNIQUE,
    customer_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    notes TEXT DEFAULT '',
    term1 TEXT DEFAULT '',
    term2 TEXT DEFAULT '',
    paid INTEGER NOT NULL DEFAULT 0,
    paid_date TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (customer_id) REFERENCES customers(id)
);

CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id);

-- Invoice line items
CREATE TABLE IF NOT EXISTS invoice_lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    quantity REAL NOT NULL DEFAULT 1.0,
    amount REAL NOT NULL,
    FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id);

-- Payments against invoices
CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL,
    customer_id INTEGER NOT NULL,
    amount REAL NOT NULL,
    method TEXT NOT NULL DEFAULT 'cash',  -- cash, check, credit_card, ach, venmo, other
    check_number TEXT DEFAULT '',
    date TEXT NOT NULL,
    notes TEXT DEFAULT '',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE,
    FOREIGN KEY (customer_id) REFERENCES customers(id)
);

CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id);
CREATE INDEX IF NOT EXISTS idx_payments_customer ON payments(customer_id);

-- Reusable service catalog for invoice lines
CREATE TABLE IF NOT EXISTS service_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    price REAL NOT NULL DEFAULT 0.0,
    is_active INTEGER NOT NULL DEFAULT 1
);
"#;

/// Fixups for databases created before the current schema. Errors are
/// ignored: a failing ALTER means the column already exists.
pub const MIGRATIONS: &[&str] = &[
    // users.theme replaced the old dark_mode boolean
    "ALTER TABLE users ADD COLUMN theme TEXT NOT NULL DEFAULT 'light'",
    "UPDATE users SET theme = 'dark' WHERE dark_mode = 1",
];

/// Every column the application expects, with the DDL fragment used to add
/// it when a restored database lacks it. Fragments carry only constant
/// defaults since SQLite rejects non-constant defaults in ALTER TABLE.
pub const EXPECTED_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "roles",
        &[
            ("id", "INTEGER"),
            ("name", "TEXT NOT NULL DEFAULT ''"),
            ("description", "TEXT"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "permissions",
        &[
            ("id", "INTEGER"),
            ("name", "TEXT NOT NULL DEFAULT ''"),
            ("description", "TEXT"),
        ],
    ),
    (
        "role_permissions",
        &[("role_id", "INTEGER"), ("permission_id", "INTEGER")],
    ),
    (
        "users",
        &[
            ("id", "INTEGER"),
            ("username", "TEXT NOT NULL DEFAULT ''"),
            ("email", "TEXT NOT NULL DEFAULT ''"),
            ("password_hash", "TEXT NOT NULL DEFAULT ''"),
            ("is_active", "INTEGER NOT NULL DEFAULT 1"),
            ("is_admin", "INTEGER NOT NULL DEFAULT 0"),
            ("role_id", "INTEGER"),
            ("theme", "TEXT NOT NULL DEFAULT 'light'"),
            ("created_at", "TEXT"),
            ("last_login", "TEXT"),
        ],
    ),
    (
        "settings",
        &[
            ("id", "INTEGER"),
            ("key", "TEXT NOT NULL DEFAULT ''"),
            ("value", "TEXT"),
            ("type", "TEXT NOT NULL DEFAULT 'text'"),
            ("description", "TEXT"),
            ("category", "TEXT DEFAULT 'general'"),
            ("options", "TEXT"),
        ],
    ),
    (
        "audit_logs",
        &[
            ("id", "INTEGER"),
            ("user_id", "INTEGER"),
            ("action", "TEXT NOT NULL DEFAULT ''"),
            ("resource", "TEXT"),
            ("resource_id", "INTEGER"),
            ("details", "TEXT"),
            ("ip_address", "TEXT"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "customers",
        &[
            ("id", "INTEGER"),
            ("name", "TEXT NOT NULL DEFAULT ''"),
            ("attn", "TEXT DEFAULT ''"),
            ("address", "TEXT DEFAULT ''"),
            ("city", "TEXT DEFAULT ''"),
            ("state", "TEXT DEFAULT ''"),
            ("zip_code", "TEXT DEFAULT ''"),
            ("phone", "TEXT DEFAULT ''"),
            ("email", "TEXT DEFAULT ''"),
            ("notes", "TEXT DEFAULT ''"),
            ("is_active", "INTEGER NOT NULL DEFAULT 1"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "invoices",
        &[
            ("id", "INTEGER"),
            ("invoice_number", "TEXT NOT NULL DEFAULT ''"),
            ("customer_id", "INTEGER NOT NULL DEFAULT 0"),
            ("date", "TEXT NOT NULL DEFAULT ''"),
            ("notes", "TEXT DEFAULT ''"),
            ("term1", "TEXT DEFAULT ''"),
            ("term2", "TEXT DEFAULT ''"),
            ("paid", "INTEGER NOT NULL DEFAULT 0"),
            ("paid_date", "TEXT"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "invoice_lines",
        &[
            ("id", "INTEGER"),
            ("invoice_id", "INTEGER NOT NULL DEFAULT 0"),
            ("description", "TEXT NOT NULL DEFAULT ''"),
            ("quantity", "REAL NOT NULL DEFAULT 1.0"),
            ("amount", "REAL NOT NULL DEFAULT 0.0"),
        ],
    ),
    (
        "payments",
        &[
            ("id", "INTEGER"),
            ("invoice_id", "INTEGER NOT NULL DEFAULT 0"),
            ("customer_id", "INTEGER NOT NULL DEFAULT 0"),
            ("amount", "REAL NOT NULL DEFAULT 0.0"),
            ("method", "TEXT NOT NULL DEFAULT 'cash'"),
            ("check_number", "TEXT DEFAULT ''"),
            ("date", "TEXT NOT NULL DEFAULT ''"),
            ("notes", "TEXT DEFAULT ''"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "service_items",
        &[
            ("id", "INTEGER"),
            ("description", "TEXT NOT NULL DEFAULT ''"),
            ("price", "REAL NOT NULL DEFAULT 0.0"),
            ("is_active", "INTEGER NOT NULL DEFAULT 1"),
        ],
    ),
];

/// Tables and columns a restored database must contain for the application
/// to boot, authenticate, and configure itself. A backup missing any of
/// these is rejected outright.
pub const CRITICAL_TABLES: &[(&str, &[&str])] = &[
    ("users", &["username", "email", "password_hash"]),
    ("settings", &["key", "value"]),
    ("roles", &["name"]),
];
