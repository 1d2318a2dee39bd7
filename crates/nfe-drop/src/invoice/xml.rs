//! Wire-format document model for NF-e XML
//!
//! Minimal serde mapping of the two document roots the pipeline accepts:
//! the authorization envelope (`nfeProc`, which wraps an `NFe` plus its
//! `protNFe` protocol) and the bare `NFe`. Every leaf is kept as a string
//! and normalized later; missing elements deserialize to their defaults so
//! that layout variations across invoice versions never abort the decode.

use serde::Deserialize;

/// `nfeProc` root: the authorized document plus its protocol.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcDocument {
    #[serde(rename = "NFe")]
    pub nfe: NfeDocument,
    #[serde(rename = "protNFe")]
    pub protocol: Option<Protocol>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Protocol {
    #[serde(rename = "infProt")]
    pub inf: ProtocolInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolInfo {
    #[serde(rename = "chNFe")]
    pub access_key: String,
    #[serde(rename = "dhRecbto")]
    pub received_at: String,
    #[serde(rename = "nProt")]
    pub protocol_number: String,
    #[serde(rename = "cStat")]
    pub status_code: String,
}

/// Bare `NFe` root.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NfeDocument {
    #[serde(rename = "infNFe")]
    pub inf: InfNfe,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InfNfe {
    #[serde(rename = "@Id")]
    pub id: String,
    #[serde(rename = "@versao")]
    pub version: String,

    pub ide: Ide,
    pub emit: Issuer,
    pub dest: Option<Recipient>,
    pub det: Vec<Det>,
    pub total: Total,
    pub transp: Option<Transport>,
    pub cobr: Option<Billing>,
    pub pag: Option<Payments>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Ide {
    #[serde(rename = "mod")]
    pub model: String,
    pub serie: String,
    #[serde(rename = "nNF")]
    pub number: String,
    /// v4.00 datetime.
    #[serde(rename = "dhEmi")]
    pub issued_at: String,
    /// 3.10 and older date.
    #[serde(rename = "dEmi")]
    pub issued_on: String,
    #[serde(rename = "tpNF")]
    pub operation_type: String,
    #[serde(rename = "tpAmb")]
    pub environment_type: String,
    #[serde(rename = "natOp")]
    pub operation_nature: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Issuer {
    #[serde(rename = "CNPJ")]
    pub cnpj: String,
    #[serde(rename = "xNome")]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Recipient {
    #[serde(rename = "CNPJ")]
    pub cnpj: String,
    #[serde(rename = "CPF")]
    pub cpf: String,
    #[serde(rename = "xNome")]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Transport {
    #[serde(rename = "modFrete")]
    pub freight_mode: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Total {
    #[serde(rename = "ICMSTot")]
    pub icms_totals: IcmsTotals,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsTotals {
    #[serde(rename = "vNF")]
    pub total: String,
    #[serde(rename = "vProd")]
    pub products: String,
    #[serde(rename = "vDesc")]
    pub discount: String,
    #[serde(rename = "vICMS")]
    pub icms: String,
    #[serde(rename = "vIPI")]
    pub ipi: String,
    #[serde(rename = "vPIS")]
    pub pis: String,
    #[serde(rename = "vCOFINS")]
    pub cofins: String,
    #[serde(rename = "vII")]
    pub ii: String,
    #[serde(rename = "vFrete")]
    pub freight: String,
    #[serde(rename = "vSeg")]
    pub insurance: String,
}

// ------------------------- items (det/prod/imposto) -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Det {
    #[serde(rename = "@nItem")]
    pub item_number: String,
    pub prod: Product,
    pub imposto: Taxes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Product {
    #[serde(rename = "cProd")]
    pub code: String,
    #[serde(rename = "cEAN")]
    pub ean_code: String,
    #[serde(rename = "xProd")]
    pub description: String,
    #[serde(rename = "NCM")]
    pub ncm: String,
    #[serde(rename = "CFOP")]
    pub cfop: String,
    #[serde(rename = "uCom")]
    pub unit: String,
    #[serde(rename = "qCom")]
    pub quantity: String,
    #[serde(rename = "vUnCom")]
    pub unit_price: String,
    #[serde(rename = "vProd")]
    pub gross_total: String,
    #[serde(rename = "vFrete")]
    pub freight: String,
    #[serde(rename = "vSeg")]
    pub insurance: String,
    #[serde(rename = "vDesc")]
    pub discount: String,
    #[serde(rename = "vOutro")]
    pub other: String,
    #[serde(rename = "indTot")]
    pub total_indicator: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Taxes {
    #[serde(rename = "ICMS")]
    pub icms: IcmsGroup,
    #[serde(rename = "IPI")]
    pub ipi: Option<Ipi>,
    #[serde(rename = "PIS")]
    pub pis: Option<Pis>,
    #[serde(rename = "COFINS")]
    pub cofins: Option<Cofins>,
}

/// The ICMS group carries exactly one of many variant sub-elements
/// depending on the tax regime of the item.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsGroup {
    #[serde(rename = "ICMS00")]
    pub icms00: Option<IcmsBase>,
    #[serde(rename = "ICMS10")]
    pub icms10: Option<IcmsBaseSt>,
    #[serde(rename = "ICMS20")]
    pub icms20: Option<IcmsBase>,
    #[serde(rename = "ICMS30")]
    pub icms30: Option<IcmsBaseSt>,
    #[serde(rename = "ICMS40")]
    pub icms40: Option<IcmsExempt>,
    #[serde(rename = "ICMS51")]
    pub icms51: Option<IcmsBase>,
    #[serde(rename = "ICMS60")]
    pub icms60: Option<IcmsStOnly>,
    #[serde(rename = "ICMS70")]
    pub icms70: Option<IcmsBaseSt>,
    #[serde(rename = "ICMS90")]
    pub icms90: Option<IcmsBaseSt>,
    #[serde(rename = "ICMSPart")]
    pub icms_part: Option<IcmsBaseSt>,
    #[serde(rename = "ICMSSN101")]
    pub icms_sn101: Option<IcmsExempt>,
    #[serde(rename = "ICMSSN102")]
    pub icms_sn102: Option<IcmsExempt>,
    #[serde(rename = "ICMSSN201")]
    pub icms_sn201: Option<IcmsBaseSt>,
    #[serde(rename = "ICMSSN202")]
    pub icms_sn202: Option<IcmsBaseSt>,
    #[serde(rename = "ICMSSN500")]
    pub icms_sn500: Option<IcmsStOnly>,
    #[serde(rename = "ICMSSN900")]
    pub icms_sn900: Option<IcmsBaseSt>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsBase {
    #[serde(rename = "vBC")]
    pub base: String,
    #[serde(rename = "vICMS")]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsBaseSt {
    #[serde(rename = "vBC")]
    pub base: String,
    #[serde(rename = "vICMS")]
    pub value: String,
    #[serde(rename = "vBCST")]
    pub st_base: String,
    #[serde(rename = "vICMSST")]
    pub st_value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsStOnly {
    #[serde(rename = "vBCST")]
    pub st_base: String,
    #[serde(rename = "vICMSST")]
    pub st_value: String,
}

/// Exempt and Simples Nacional variants without base or value dimensions.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IcmsExempt {}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Ipi {
    #[serde(rename = "IPITrib")]
    pub taxed: Option<IpiTaxed>,
    #[serde(rename = "IPINT")]
    pub untaxed: Option<IpiUntaxed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IpiTaxed {
    #[serde(rename = "vIPI")]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IpiUntaxed {}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Pis {
    #[serde(rename = "PISAliq")]
    pub rate: Option<PisValue>,
    #[serde(rename = "PISQtde")]
    pub quantity: Option<PisValue>,
    #[serde(rename = "PISNT")]
    pub untaxed: Option<PisValue>,
    #[serde(rename = "PISOutr")]
    pub other: Option<PisValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PisValue {
    #[serde(rename = "vPIS")]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Cofins {
    #[serde(rename = "COFINSAliq")]
    pub rate: Option<CofinsValue>,
    #[serde(rename = "COFINSQtde")]
    pub quantity: Option<CofinsValue>,
    #[serde(rename = "COFINSNT")]
    pub untaxed: Option<CofinsValue>,
    #[serde(rename = "COFINSOutr")]
    pub other: Option<CofinsValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CofinsValue {
    #[serde(rename = "vCOFINS")]
    pub value: String,
}

// ---------------------------- billing / payments ----------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Billing {
    #[serde(rename = "dup")]
    pub receivables: Vec<Receivable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Receivable {
    #[serde(rename = "nDup")]
    pub number: String,
    #[serde(rename = "dVenc")]
    pub due_date: String,
    #[serde(rename = "vDup")]
    pub amount: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Payments {
    #[serde(rename = "detPag")]
    pub entries: Vec<PaymentEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PaymentEntry {
    #[serde(rename = "indPag")]
    pub indicator: String,
    #[serde(rename = "tPag")]
    pub method: String,
    #[serde(rename = "vPag")]
    pub amount: String,
    pub card: Option<Card>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Card {
    #[serde(rename = "CNPJ")]
    pub acquirer_cnpj: String,
    #[serde(rename = "tBand")]
    pub brand: String,
    #[serde(rename = "cAut")]
    pub authorization_code: String,
}
