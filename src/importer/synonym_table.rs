// ==========================================
// 汽修厂管理系统 - 表头同义词表
// ==========================================
// 职责: 按实体种类声明规范字段、值类别、同义词、关键字、必填规则
// 红线: 只有数据,不含匹配逻辑（匹配见 schema_mapper）
// ==========================================
// 同义词以归一化形式书写: NFKC + 小写 + 仅保留字母数字
// 例: "_ID_Customer" → "idcustomer", "Invoice Number" → "invoicenumber"
// ==========================================

use crate::domain::types::{EntityKind, ValueClass};
use unicode_normalization::UnicodeNormalization;

// ==========================================
// FieldSpec - 规范字段声明
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub class: ValueClass,
    pub synonyms: &'static [&'static str], // 精确匹配
    pub keywords: &'static [&'static str], // 包含匹配（最长者胜出）
}

// ==========================================
// EntitySchema - 实体表头声明
// ==========================================
#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: &'static [FieldSpec],
    /// 必填规则: 每组至少映射到其中一个字段
    pub required: &'static [&'static [&'static str]],
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// 表头归一化（NFKC + 小写 + 仅保留字母数字）
pub fn normalize_header(header: &str) -> String {
    header
        .nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// 获取实体种类的表头声明
pub fn schema_for(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Customer => &CUSTOMER_SCHEMA,
        EntityKind::Vehicle => &VEHICLE_SCHEMA,
        EntityKind::Invoice => &INVOICE_SCHEMA,
        EntityKind::Document => &DOCUMENT_SCHEMA,
    }
}

const fn field(
    name: &'static str,
    class: ValueClass,
    synonyms: &'static [&'static str],
    keywords: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        class,
        synonyms,
        keywords,
    }
}

// ===== 跨实体引用列（车辆/发票/单据共用）=====
const CUSTOMER_REF_ID: FieldSpec = field(
    "customer_ref_id",
    ValueClass::Code,
    &["idcustomer", "customerid", "custid", "ownerid", "customeraccount", "accountno"],
    &[],
);
const CUSTOMER_NAME: FieldSpec = field(
    "customer_name",
    ValueClass::Name,
    &["customer", "customername", "owner", "ownername", "keeper", "client", "clientname", "name", "billto"],
    &["customer", "owner", "keeper", "client"],
);
const VEHICLE_REF_ID: FieldSpec = field(
    "vehicle_ref_id",
    ValueClass::Code,
    &["idvehicle", "vehicleid"],
    &[],
);
const VEHICLE_REGISTRATION: FieldSpec = field(
    "registration",
    ValueClass::Registration,
    &["registration", "reg", "regno", "regnumber", "registrationnumber", "registrationno", "regid", "vrm", "vehicle", "vehiclereg", "vehicleregistration"],
    &["registration"],
);

// ===== 金额/状态/备注（发票与单据共用）=====
const TOTAL_AMOUNT: FieldSpec = field(
    "total_amount",
    ValueClass::Money,
    &["total", "amount", "totalamount", "gross", "grandtotal", "invoicetotal", "totalincvat", "value"],
    &["total", "amount", "gross"],
);
const TAX_AMOUNT: FieldSpec = field(
    "tax_amount",
    ValueClass::Money,
    &["vat", "tax", "vatamount", "taxamount", "totalvat"],
    &["vat", "tax"],
);
const STATUS: FieldSpec = field(
    "status",
    ValueClass::Text,
    &["status", "paymentstatus", "state", "paid"],
    &["status"],
);
const NOTES: FieldSpec = field(
    "notes",
    ValueClass::Text,
    &["notes", "note", "comments", "comment", "description", "memo", "remarks"],
    &["note", "comment", "remark"],
);

// ==========================================
// 客户
// ==========================================
static CUSTOMER_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Customer,
    fields: &[
        field("external_id", ValueClass::Code, &["id", "customerid", "custid", "customerno", "customernumber", "accountno", "accountnumber"], &[]),
        field("title", ValueClass::Name, &["title", "nametitle", "salutation"], &["title", "salutation"]),
        field("forename", ValueClass::Name, &["forename", "firstname", "nameforename", "givenname", "first"], &["forename", "firstname"]),
        field("surname", ValueClass::Name, &["surname", "lastname", "namesurname", "familyname", "last"], &["surname", "lastname"]),
        field("full_name", ValueClass::Name, &["name", "fullname", "customername", "customer", "contactname", "client", "clientname"], &["fullname", "customername", "clientname", "contactname"]),
        field("company", ValueClass::Text, &["company", "companyname", "namecompany", "business", "businessname", "organisation", "organization"], &["company", "business"]),
        field("email", ValueClass::Email, &["email", "emailaddress", "contactemail", "mail"], &["email"]),
        field("mobile", ValueClass::Phone, &["mobile", "mobilephone", "contactmobile", "mobileno", "mobilenumber", "cell", "cellphone"], &["mobile"]),
        field("landline", ValueClass::Phone, &["phone", "telephone", "tel", "contacttelephone", "phonenumber", "telephoneno", "landline", "homephone", "workphone"], &["phone", "telephone"]),
        field("house_no", ValueClass::Text, &["houseno", "housenumber", "addresshouseno", "housenameno", "building"], &["house"]),
        field("street", ValueClass::Text, &["address", "address1", "addressline1", "street", "addressroad", "road", "fulladdress"], &["address", "street"]),
        field("locality", ValueClass::Text, &["address2", "addressline2", "locality", "addresslocality", "district", "area"], &["locality"]),
        field("town", ValueClass::Text, &["town", "city", "addresstown", "posttown"], &["town", "city"]),
        field("county", ValueClass::Text, &["county", "addresscounty", "region"], &["county"]),
        field("postcode", ValueClass::Postcode, &["postcode", "postalcode", "zip", "zipcode", "addresspostcode"], &["postcode", "postal"]),
    ],
    required: &[&["forename", "surname", "full_name", "company"]],
};

// ==========================================
// 车辆
// ==========================================
static VEHICLE_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Vehicle,
    fields: &[
        field("external_id", ValueClass::Code, &["id", "vehicleid", "idvehicle"], &[]),
        CUSTOMER_REF_ID,
        CUSTOMER_NAME,
        field("registration", ValueClass::Registration, &["registration", "reg", "regno", "regnumber", "registrationnumber", "registrationno", "regid", "vrm", "licence", "license", "licenceplate", "licenseplate", "numberplate", "plate"], &["registration", "licen", "plate"]),
        field("make", ValueClass::Text, &["make", "manufacturer", "marque"], &["make", "manufacturer"]),
        field("model", ValueClass::Text, &["model", "modelname", "variant"], &["model"]),
        field("year", ValueClass::Year, &["year", "yearofmanufacture", "modelyear", "yom", "manufactureyear"], &["year"]),
        field("first_registered", ValueClass::Date, &["dateofreg", "dateofregistration", "firstregistered", "firstregistration", "regdate", "registrationdate", "datefirstregistered"], &["dateofreg", "firstreg", "registered"]),
        field("colour", ValueClass::Text, &["colour", "color", "paint"], &["colour", "color"]),
        field("vin", ValueClass::Code, &["vin", "vinnumber", "chassis", "chassisno", "chassisnumber", "vehicleidentificationnumber"], &["chassis"]),
        field("engine_size", ValueClass::Text, &["enginesize", "enginecc", "cc", "engine", "enginecapacity"], &["engine"]),
        field("fuel_type", ValueClass::Text, &["fuel", "fueltype"], &["fuel"]),
        field("transmission", ValueClass::Text, &["transmission", "gearbox"], &["transmission", "gearbox"]),
        field("mot_expiry", ValueClass::Date, &["mot", "motexpiry", "motexpirydate", "motdue", "motduedate", "motexpires", "motdate"], &["motexp", "motdue"]),
    ],
    required: &[&["registration"]],
};

// ==========================================
// 发票
// ==========================================
static INVOICE_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Invoice,
    fields: &[
        field("external_id", ValueClass::Code, &["id", "invoiceid", "idinvoice"], &[]),
        field("invoice_number", ValueClass::Code, &["invoicenumber", "invoiceno", "invoice", "invno", "invoiceref", "number"], &["invoiceno", "invoicenum", "invnum"]),
        CUSTOMER_REF_ID,
        CUSTOMER_NAME,
        VEHICLE_REF_ID,
        VEHICLE_REGISTRATION,
        field("invoice_date", ValueClass::Date, &["date", "invoicedate", "dateissued", "issuedate", "datecreated", "created"], &["date"]),
        field("due_date", ValueClass::Date, &["duedate", "due", "paymentdue", "datedue"], &["duedate", "due"]),
        TOTAL_AMOUNT,
        TAX_AMOUNT,
        STATUS,
        NOTES,
    ],
    required: &[&["invoice_number"]],
};

// ==========================================
// 单据（估价单 / 工单等）
// ==========================================
static DOCUMENT_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Document,
    fields: &[
        field("external_id", ValueClass::Code, &["id", "documentid", "iddocument", "docid"], &[]),
        field("document_number", ValueClass::Code, &["documentnumber", "documentno", "docno", "number", "reference", "ref", "document", "jobno", "jobnumber"], &["docno", "documentno", "documentnum", "jobno"]),
        field("document_type", ValueClass::Text, &["type", "documenttype", "doctype", "category"], &["type"]),
        CUSTOMER_REF_ID,
        CUSTOMER_NAME,
        VEHICLE_REF_ID,
        VEHICLE_REGISTRATION,
        field("document_date", ValueClass::Date, &["date", "documentdate", "docdate", "issued", "datecreated", "created"], &["date"]),
        TOTAL_AMOUNT,
        TAX_AMOUNT,
        STATUS,
        NOTES,
    ],
    required: &[&["document_number"]],
};
