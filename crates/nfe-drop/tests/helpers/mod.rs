//! Shared fixtures and in-memory collaborators for integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use nfe_common::{NfeError, Result};
use nfe_drop::config::DirectoryConfig;
use nfe_drop::invoice::ParsedInvoice;
use nfe_drop::queue::{Job, JobPublisher};
use nfe_drop::store::{InvoiceStore, SaveOutcome};

/// Access key used by the default fixture.
pub const FIXTURE_ACCESS_KEY: &str = "35240114200166000187550010000000011000000017";

/// A complete authorized invoice (nfeProc envelope) with one item, one
/// receivable and one card payment.
pub fn proc_invoice_xml(access_key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{access_key}" versao="4.00">
      <ide>
        <mod>55</mod>
        <serie>1</serie>
        <nNF>1</nNF>
        <dhEmi>2024-01-15T10:30:00-03:00</dhEmi>
        <tpNF>1</tpNF>
        <tpAmb>2</tpAmb>
        <natOp>VENDA DE MERCADORIA</natOp>
      </ide>
      <emit>
        <CNPJ>14.200.166/0001-87</CNPJ>
        <xNome> ACME COMERCIO LTDA </xNome>
      </emit>
      <dest>
        <CNPJ>11222333000181</CNPJ>
        <xNome>CLIENTE EXEMPLO SA</xNome>
      </dest>
      <det nItem="1">
        <prod>
          <cProd>SKU-001</cProd>
          <cEAN>7891234567895</cEAN>
          <xProd>PARAFUSO SEXTAVADO</xProd>
          <NCM>73181500</NCM>
          <CFOP>5102</CFOP>
          <uCom>UN</uCom>
          <qCom>10.0000</qCom>
          <vUnCom>10.0000000000</vUnCom>
          <vProd>100.00</vProd>
          <indTot>1</indTot>
        </prod>
        <imposto>
          <ICMS>
            <ICMS00>
              <vBC>100.00</vBC>
              <vICMS>18.00</vICMS>
            </ICMS00>
          </ICMS>
          <IPI>
            <IPITrib>
              <vIPI>5.00</vIPI>
            </IPITrib>
          </IPI>
          <PIS>
            <PISAliq>
              <vPIS>1.65</vPIS>
            </PISAliq>
          </PIS>
          <COFINS>
            <COFINSAliq>
              <vCOFINS>7.60</vCOFINS>
            </COFINSAliq>
          </COFINS>
        </imposto>
      </det>
      <total>
        <ICMSTot>
          <vNF>100.00</vNF>
          <vProd>100.00</vProd>
          <vDesc>0.00</vDesc>
          <vICMS>18.00</vICMS>
          <vIPI>5.00</vIPI>
          <vPIS>1.65</vPIS>
          <vCOFINS>7.60</vCOFINS>
          <vII>0.00</vII>
          <vFrete>0.00</vFrete>
          <vSeg>0.00</vSeg>
        </ICMSTot>
      </total>
      <transp>
        <modFrete>0</modFrete>
      </transp>
      <cobr>
        <dup>
          <nDup>001</nDup>
          <dVenc>2024-02-15</dVenc>
          <vDup>100.00</vDup>
        </dup>
      </cobr>
      <pag>
        <detPag>
          <indPag>0</indPag>
          <tPag>03</tPag>
          <vPag>100.00</vPag>
          <card>
            <CNPJ>01027058000191</CNPJ>
            <tBand>01</tBand>
            <cAut>A12345</cAut>
          </card>
        </detPag>
      </pag>
    </infNFe>
  </NFe>
  <protNFe>
    <infProt>
      <chNFe>{access_key}</chNFe>
      <dhRecbto>2024-01-15T10:31:02-03:00</dhRecbto>
      <nProt>135240000000001</nProt>
      <cStat>100</cStat>
    </infProt>
  </protNFe>
</nfeProc>
"#
    )
}

/// A bare `NFe` document (no protocol envelope), legacy date field.
pub fn bare_invoice_xml(access_key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<NFe xmlns="http://www.portalfiscal.inf.br/nfe">
  <infNFe Id="NFe{access_key}" versao="3.10">
    <ide>
      <mod>55</mod>
      <serie>2</serie>
      <nNF>42</nNF>
      <dEmi>2019-06-30</dEmi>
      <tpNF>1</tpNF>
      <tpAmb>1</tpAmb>
      <natOp>VENDA</natOp>
    </ide>
    <emit>
      <CNPJ>14200166000187</CNPJ>
      <xNome>ACME COMERCIO LTDA</xNome>
    </emit>
    <dest>
      <CPF>123.456.789-09</CPF>
      <xNome>PESSOA FISICA</xNome>
    </dest>
    <det nItem="1">
      <prod>
        <cProd>SKU-002</cProd>
        <xProd>ARRUELA LISA</xProd>
        <NCM>73182200</NCM>
        <CFOP>5102</CFOP>
        <uCom>UN</uCom>
        <qCom>5</qCom>
        <vUnCom>2,50</vUnCom>
        <vProd>12,50</vProd>
        <indTot>1</indTot>
      </prod>
      <imposto>
        <ICMS>
          <ICMSSN102/>
        </ICMS>
      </imposto>
    </det>
    <total>
      <ICMSTot>
        <vNF>12,50</vNF>
        <vProd>12,50</vProd>
      </ICMSTot>
    </total>
  </infNFe>
</NFe>
"#
    )
}

/// Invoice whose `det` carries the given `imposto/ICMS` fragment.
pub fn invoice_xml_with_icms(access_key: &str, icms_fragment: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{access_key}" versao="4.00">
      <ide>
        <mod>55</mod>
        <serie>1</serie>
        <nNF>7</nNF>
        <dhEmi>2024-03-01T08:00:00-03:00</dhEmi>
        <tpNF>1</tpNF>
        <tpAmb>2</tpAmb>
        <natOp>VENDA</natOp>
      </ide>
      <emit>
        <CNPJ>14200166000187</CNPJ>
        <xNome>ACME COMERCIO LTDA</xNome>
      </emit>
      <det nItem="1">
        <prod>
          <cProd>SKU-003</cProd>
          <xProd>PORCA SEXTAVADA</xProd>
          <uCom>UN</uCom>
          <qCom>1</qCom>
          <vUnCom>50.00</vUnCom>
          <vProd>50.00</vProd>
          <indTot>1</indTot>
        </prod>
        <imposto>
          <ICMS>
            {icms_fragment}
          </ICMS>
        </imposto>
      </det>
      <total>
        <ICMSTot>
          <vNF>50.00</vNF>
          <vProd>50.00</vProd>
        </ICMSTot>
      </total>
    </infNFe>
  </NFe>
  <protNFe>
    <infProt>
      <chNFe>{access_key}</chNFe>
      <dhRecbto>2024-03-01T08:01:00-03:00</dhRecbto>
      <nProt>135240000000002</nProt>
      <cStat>100</cStat>
    </infProt>
  </protNFe>
</nfeProc>
"#
    )
}

/// Staged directories rooted under a test directory, all pre-created.
pub fn test_dirs(root: &Path) -> DirectoryConfig {
    let dirs = DirectoryConfig {
        incoming: root.join("incoming"),
        processing: root.join("processing"),
        processed: root.join("processed"),
        failed: root.join("failed"),
        ignored: root.join("ignored"),
        tmp: root.join("tmp"),
    };
    dirs.ensure_all().expect("create staged directories");
    dirs
}

/// In-memory publisher recording every published job.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Job>>,
    fail: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail, simulating a broker outage.
    pub fn fail_publishes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Job> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobPublisher for MemoryPublisher {
    async fn publish(&self, job: &Job) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NfeError::queue(
                "publish",
                "timed out waiting for broker confirmation",
            ));
        }
        self.published.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// In-memory store enforcing the same uniqueness rules as the database.
#[derive(Default)]
pub struct MemoryStore {
    access_keys: Mutex<HashSet<String>>,
    integrity_hashes: Mutex<HashSet<String>>,
    fail: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail, simulating a database outage.
    pub fn fail_saves(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn saved_count(&self) -> usize {
        self.access_keys.lock().unwrap().len()
    }

    pub fn contains_access_key(&self, access_key: &str) -> bool {
        self.access_keys.lock().unwrap().contains(access_key)
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn save(&self, invoice: &ParsedInvoice) -> Result<SaveOutcome> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NfeError::database("insert invoice", "synthetic failure"));
        }

        let mut access_keys = self.access_keys.lock().unwrap();
        let mut hashes = self.integrity_hashes.lock().unwrap();

        if access_keys.contains(&invoice.access_key)
            || hashes.contains(&invoice.integrity_hash)
        {
            return Ok(SaveOutcome::Duplicate);
        }

        access_keys.insert(invoice.access_key.clone());
        hashes.insert(invoice.integrity_hash.clone());

        Ok(SaveOutcome::Saved {
            invoice_id: access_keys.len() as i64,
        })
    }
}
